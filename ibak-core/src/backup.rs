use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::catalog::{Backend, CATALOG_FILE, Catalog, CatalogQuery, InMemCatalog, open_catalog};
use crate::domain::{CatalogRecord, split_domain};
use crate::error::{BackupError, Result};
use crate::export::{ExportOptions, ExportReport, Exporter};
use crate::info::{
    AppInfo, BackupManifest, INFO_FILE, Info, MANIFEST_FILE, STATUS_FILE, Status, read_plist,
    summary,
};
use crate::progress::Progress;
use crate::resolve::{ContentResolver, file_identity};
use crate::selection::ExportSelection;

/// An archive root: its catalog, content files and descriptor plists.
pub struct Backup {
    root: PathBuf,
    catalog: Box<dyn Catalog>,
    resolver: ContentResolver,
}

impl Backup {
    /// Opens the archive at `root`, refusing encrypted backups.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let db = root.join(CATALOG_FILE);
        if !db.is_file() {
            return Err(BackupError::CatalogNotFound(db));
        }

        let manifest_path = root.join(MANIFEST_FILE);
        if manifest_path.is_file() {
            match read_plist::<BackupManifest>(&manifest_path) {
                Ok(m) if m.is_encrypted() => return Err(BackupError::Encrypted(root)),
                Ok(_) => {}
                Err(e) => warn!(path = %manifest_path.display(), error = %e, "unreadable backup manifest"),
            }
        }

        let catalog = open_catalog(Backend::Sqlite, db)?;
        info!(root = %root.display(), "opened backup");
        Ok(Self::with_catalog(root, catalog))
    }

    pub fn with_catalog(root: impl Into<PathBuf>, catalog: Box<dyn Catalog>) -> Self {
        let root = root.into();
        Self {
            resolver: ContentResolver::new(root.clone()),
            root,
            catalog,
        }
    }

    /// Direct content access for damaged archives: no catalog is read, so
    /// only `file_by_id`, `file_by_path` and the plist accessors are useful.
    pub fn without_catalog(root: impl Into<PathBuf>) -> Self {
        Self::with_catalog(root, Box::new(InMemCatalog::default()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog(&self) -> &dyn Catalog {
        self.catalog.as_ref()
    }

    pub fn select(&self, query: &CatalogQuery) -> Result<ExportSelection<'_>> {
        debug!(?query, "select");
        let rows = self.catalog.rows(query)?;
        Ok(ExportSelection::new(rows, query.record_filter().cloned()))
    }

    pub fn count(&self, query: &CatalogQuery) -> Result<u64> {
        self.catalog.count(query)
    }

    pub fn domains(&self) -> Result<Vec<String>> {
        self.catalog.domains()
    }

    pub fn namespaces(&self, domain: &str) -> Result<Vec<String>> {
        self.catalog.namespaces(domain)
    }

    pub fn export<I>(
        &self,
        selection: I,
        output_root: &Path,
        options: &ExportOptions,
        progress: Option<&dyn Progress>,
    ) -> Result<ExportReport>
    where
        I: Iterator<Item = Result<CatalogRecord>>,
    {
        Exporter::new(self.resolver.clone(), options.clone()).export(selection, output_root, progress)
    }

    pub fn content_path(&self, identity: &str) -> PathBuf {
        self.resolver.resolve(identity)
    }

    pub fn file_by_id(&self, identity: &str) -> Result<PathBuf> {
        self.existing(identity, "", "")
    }

    /// Looks a file up by the identity the device derives from its domain and
    /// path, without consulting the catalog.
    pub fn file_by_path(&self, raw_domain: &str, relative_path: &str) -> Result<PathBuf> {
        let identity = file_identity(raw_domain, relative_path);
        self.existing(&identity, raw_domain, relative_path)
    }

    fn existing(&self, identity: &str, raw_domain: &str, relative_path: &str) -> Result<PathBuf> {
        let path = self.content_path(identity);
        if path.is_file() {
            return Ok(path);
        }
        let (domain, namespace) = split_domain(raw_domain);
        Err(BackupError::ContentMissing {
            identity: identity.to_owned(),
            domain: domain.to_owned(),
            namespace: namespace.to_owned(),
            relative_path: relative_path.to_owned(),
            content_path: path,
        })
    }

    pub fn info(&self) -> Result<Info> {
        Info::load(&self.root.join(INFO_FILE))
    }

    pub fn status(&self) -> Result<Status> {
        read_plist(&self.root.join(STATUS_FILE))
    }

    pub fn manifest(&self) -> Result<BackupManifest> {
        read_plist(&self.root.join(MANIFEST_FILE))
    }

    /// Device summary; a missing or unreadable `Manifest.plist` only blanks
    /// the encryption row.
    pub fn summary(&self) -> Result<Vec<(String, String)>> {
        let info = self.info()?;
        let manifest = self.manifest().ok();
        Ok(summary(&info, manifest.as_ref()))
    }

    pub fn apps(&self) -> Result<Vec<AppInfo>> {
        Ok(self.info()?.apps())
    }
}
