//! Socket side of a connection: line framing, STARTTLS and the handler task.

mod handler;
mod stream;
mod tls;

pub use handler::{CloseReason, ConnectionContext, MAX_COMMAND_LINE, handle_connection};
pub use stream::{Line, SmtpStream};
pub use tls::load_tls_acceptor;
