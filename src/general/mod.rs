pub mod cancel;
pub mod check;
pub mod stdin_handler;
pub mod transpose;
