pub mod session;
pub mod sim;
