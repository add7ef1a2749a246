pub mod cat;
pub mod get;
pub mod init;
pub mod ls;
pub mod put;
pub mod rm;
pub mod verify;

pub use cat::Cat;
pub use get::Get;
pub use init::Init;
pub use ls::Ls;
pub use put::Put;
pub use rm::Rm;
pub use verify::Verify;
