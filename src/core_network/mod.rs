pub mod buffer;
pub mod pasv;
pub mod socket;
