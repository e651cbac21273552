pub mod counting;
pub mod resp;
pub mod server;

pub use counting::CountingConnection;
pub use server::TestServer;
