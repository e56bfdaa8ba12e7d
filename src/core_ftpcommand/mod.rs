// Control-channel vocabulary: the commands the client stages and the replies it reacts to
pub mod ftpcommand;
pub mod reply;

pub use ftpcommand::FtpCommand;
pub use reply::Reply;
