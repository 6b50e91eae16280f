mod application;

mod presentation {
    pub mod cli;
    pub mod progress;
    pub mod table;
}

use ibak_core::error::Result;

fn main() -> Result<()> {
    application::run()
}
