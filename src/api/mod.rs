// HTTP APIs: guild access and Discord connect flow

mod error;
pub mod guilds;
pub mod oauth;
pub mod session;

pub use error::AppError;
pub use guilds::{create_guild_router, GuildAppState, PermittedServersResponse};
pub use oauth::{create_oauth_router, run_state_purge, ConnectStates, OAuthAppState};
pub use session::{
    session_from_header, SessionProxy, SessionUser, SESSION_PROXY_SECRET_HEADER,
    SESSION_USER_HEADER,
};
