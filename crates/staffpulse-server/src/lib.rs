pub mod auth;
pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod registry;
pub mod server;
pub mod state;

pub use auth::{AuthError, PrincipalResolver, StaticTokenResolver};
pub use config::{ServerConfig, TokenGrant};
pub use dispatcher::{DispatchReport, DomainTrigger, EventDispatcher};
pub use registry::{ChannelRegistry, Outbound, RegistryError, RelayReport};
pub use server::{build_router, run_server};
pub use state::{AppState, LoggingReadReceipts, ReadReceiptSink};
