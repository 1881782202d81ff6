pub(crate) mod command;
pub(crate) mod explore;
pub(crate) mod scan;
pub(crate) mod ui;

pub use self::command::{Args, Command, FakeArgs, LogLevel, OutputFormat};
pub use self::explore::ExploreArgs;
pub use self::scan::ScanArgs;
