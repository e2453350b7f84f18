//! Login and heartbeat commands.
//!
//! A minimal request/response pair exercising the router and session
//! send path end to end, plus the heartbeat commands the on-timeout
//! callback emits.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::router::CommandRouter;
use crate::session::Session;
use crate::Result;

pub const CMD_LOGIN_REQ: u32 = 1001;
pub const CMD_LOGIN_RESP: u32 = 1002;
pub const CMD_HEARTBEAT_REQ: u32 = 1003;
pub const CMD_HEARTBEAT_RESP: u32 = 1004;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub account: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginInfo {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub code: u32,
    pub info: LoginInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heartbeat {}

/// Handle a login request on the serving side.
pub async fn on_login_request(session: Arc<Session>, request: LoginRequest) -> Result<()> {
    info!(
        session_id = session.id(),
        account = %request.account,
        "Login request received"
    );

    let response = LoginResponse {
        code: 200,
        info: LoginInfo {
            id: 1,
            name: "SpiderMan.".to_string(),
        },
    };
    session.mark_logon();
    session.send(CMD_LOGIN_RESP, &response).await
}

/// Handle a login response on the dialing side.
pub async fn on_login_response(session: Arc<Session>, response: LoginResponse) -> Result<()> {
    info!(
        session_id = session.id(),
        code = response.code,
        name = %response.info.name,
        "Login response received"
    );
    if response.code == 200 {
        session.mark_logon();
    }
    Ok(())
}

/// Answer a heartbeat request.
pub async fn on_heartbeat_request(session: Arc<Session>, _request: Heartbeat) -> Result<()> {
    debug!(session_id = session.id(), "Heartbeat request received");
    session.send(CMD_HEARTBEAT_RESP, &Heartbeat {}).await
}

/// Observe a heartbeat response.
pub async fn on_heartbeat_response(session: Arc<Session>, _response: Heartbeat) -> Result<()> {
    debug!(session_id = session.id(), "Heartbeat response received");
    Ok(())
}

/// Register the serving-side handlers.
pub fn register_server(router: &mut CommandRouter) {
    router.register::<LoginRequest, _, _>(CMD_LOGIN_REQ, on_login_request);
    router.register::<Heartbeat, _, _>(CMD_HEARTBEAT_REQ, on_heartbeat_request);
}

/// Register the dialing-side handlers.
pub fn register_client(router: &mut CommandRouter) {
    router.register::<LoginResponse, _, _>(CMD_LOGIN_RESP, on_login_response);
    router.register::<Heartbeat, _, _>(CMD_HEARTBEAT_RESP, on_heartbeat_response);
}
