//! RTMP handler trait
//!
//! The authorization extension point for RTMP applications. Implement this
//! trait to accept or refuse connections, publishes, and plays. Lifecycle
//! notifications and media access go through [`crate::events`] instead.

use async_trait::async_trait;

use crate::protocol::command::ConnectParams;
use crate::registry::{StreamArgs, StreamPath};
use crate::session::SessionContext;

/// Result of authentication/authorization checks
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    /// Accept the request
    Accept,

    /// Accept, but route the stream to a different path
    AcceptAs(StreamPath),

    /// Reject the request with a reason
    Reject(String),
}

impl AuthResult {
    /// Check if the result accepts the request
    pub fn is_accept(&self) -> bool {
        matches!(self, AuthResult::Accept | AuthResult::AcceptAs(_))
    }

    /// Check if the result is Reject
    pub fn is_reject(&self) -> bool {
        matches!(self, AuthResult::Reject(_))
    }
}

/// A publish waiting for authorization
#[derive(Debug, Clone)]
pub struct PublishAuth<'a> {
    pub path: &'a StreamPath,
    pub args: &'a StreamArgs,
    /// "live", "record" or "append"
    pub publish_type: &'a str,
}

/// Handler trait for RTMP applications
///
/// All methods have default implementations that accept everything.
///
/// # Example
///
/// ```ignore
/// use rtmp_server::{AuthResult, RtmpHandler};
/// use rtmp_server::server::handler::PublishAuth;
/// use rtmp_server::session::SessionContext;
///
/// struct KeyCheck;
///
/// #[async_trait::async_trait]
/// impl RtmpHandler for KeyCheck {
///     async fn authorize_publish(&self, _ctx: &SessionContext, req: &PublishAuth<'_>) -> AuthResult {
///         match req.args.get("key") {
///             Some(key) if key == "secret" => AuthResult::Accept,
///             _ => AuthResult::Reject("Invalid stream key".into()),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait RtmpHandler: Send + Sync + 'static {
    /// Called when a new TCP connection is established
    ///
    /// Return false to immediately close the connection.
    /// Use this for IP-based rate limiting or blocklists.
    async fn on_connection(&self, _ctx: &SessionContext) -> bool {
        true
    }

    /// Called on RTMP 'connect' command
    ///
    /// Validate the application name, auth tokens in tcUrl, etc. A path
    /// override is meaningless here and treated as Accept.
    async fn on_connect(&self, _ctx: &SessionContext, _params: &ConnectParams) -> AuthResult {
        AuthResult::Accept
    }

    /// Called on 'publish' before the path is registered
    async fn authorize_publish(&self, _ctx: &SessionContext, _req: &PublishAuth<'_>) -> AuthResult {
        AuthResult::Accept
    }

    /// Called on 'play' before subscribing
    async fn authorize_subscribe(
        &self,
        _ctx: &SessionContext,
        _path: &StreamPath,
        _args: &StreamArgs,
    ) -> AuthResult {
        AuthResult::Accept
    }

    /// Called after the connection has been torn down
    async fn on_disconnect(&self, _ctx: &SessionContext) {}
}

/// A simple handler that accepts all connections and logs events
pub struct LoggingHandler;

#[async_trait]
impl RtmpHandler for LoggingHandler {
    async fn on_connection(&self, ctx: &SessionContext) -> bool {
        tracing::info!(
            session_id = ctx.session_id,
            peer = %ctx.peer_addr,
            "New connection"
        );
        true
    }

    async fn on_connect(&self, ctx: &SessionContext, params: &ConnectParams) -> AuthResult {
        tracing::info!(
            session_id = ctx.session_id,
            app = %params.app,
            "Connect request"
        );
        AuthResult::Accept
    }

    async fn authorize_publish(&self, ctx: &SessionContext, req: &PublishAuth<'_>) -> AuthResult {
        tracing::info!(
            session_id = ctx.session_id,
            stream = %req.path,
            publish_type = req.publish_type,
            "Publish request"
        );
        AuthResult::Accept
    }

    async fn authorize_subscribe(
        &self,
        ctx: &SessionContext,
        path: &StreamPath,
        _args: &StreamArgs,
    ) -> AuthResult {
        tracing::info!(
            session_id = ctx.session_id,
            stream = %path,
            "Play request"
        );
        AuthResult::Accept
    }

    async fn on_disconnect(&self, ctx: &SessionContext) {
        tracing::info!(session_id = ctx.session_id, "Connection closed");
    }
}

/// A handler wrapper that chains multiple handlers
///
/// The second handler is only asked if the first accepts; a path override
/// from the first is kept unless the second overrides it again.
pub struct ChainedHandler<H1, H2> {
    first: H1,
    second: H2,
}

impl<H1, H2> ChainedHandler<H1, H2>
where
    H1: RtmpHandler,
    H2: RtmpHandler,
{
    pub fn new(first: H1, second: H2) -> Self {
        Self { first, second }
    }
}

fn chain(first: AuthResult, second: AuthResult) -> AuthResult {
    match (first, second) {
        (AuthResult::AcceptAs(path), AuthResult::Accept) => AuthResult::AcceptAs(path),
        (_, second) => second,
    }
}

#[async_trait]
impl<H1, H2> RtmpHandler for ChainedHandler<H1, H2>
where
    H1: RtmpHandler,
    H2: RtmpHandler,
{
    async fn on_connection(&self, ctx: &SessionContext) -> bool {
        self.first.on_connection(ctx).await && self.second.on_connection(ctx).await
    }

    async fn on_connect(&self, ctx: &SessionContext, params: &ConnectParams) -> AuthResult {
        let result = self.first.on_connect(ctx, params).await;
        if result.is_accept() {
            chain(result, self.second.on_connect(ctx, params).await)
        } else {
            result
        }
    }

    async fn authorize_publish(&self, ctx: &SessionContext, req: &PublishAuth<'_>) -> AuthResult {
        let result = self.first.authorize_publish(ctx, req).await;
        if result.is_accept() {
            chain(result, self.second.authorize_publish(ctx, req).await)
        } else {
            result
        }
    }

    async fn authorize_subscribe(
        &self,
        ctx: &SessionContext,
        path: &StreamPath,
        args: &StreamArgs,
    ) -> AuthResult {
        let result = self.first.authorize_subscribe(ctx, path, args).await;
        if result.is_accept() {
            chain(result, self.second.authorize_subscribe(ctx, path, args).await)
        } else {
            result
        }
    }

    async fn on_disconnect(&self, ctx: &SessionContext) {
        self.first.on_disconnect(ctx).await;
        self.second.on_disconnect(ctx).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    struct DenyPlay;

    #[async_trait]
    impl RtmpHandler for DenyPlay {
        async fn authorize_subscribe(
            &self,
            _ctx: &SessionContext,
            _path: &StreamPath,
            _args: &StreamArgs,
        ) -> AuthResult {
            AuthResult::Reject("no viewers".into())
        }
    }

    struct Rename;

    #[async_trait]
    impl RtmpHandler for Rename {
        async fn authorize_publish(&self, _ctx: &SessionContext, _req: &PublishAuth<'_>) -> AuthResult {
            AuthResult::AcceptAs(StreamPath::from_raw("/live/renamed"))
        }
    }

    fn ctx() -> SessionContext {
        SessionContext::new(1, SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 5000))
    }

    #[test]
    fn test_auth_result() {
        assert!(AuthResult::Accept.is_accept());
        assert!(AuthResult::AcceptAs(StreamPath::from_raw("/a/b")).is_accept());
        assert!(AuthResult::Reject("x".into()).is_reject());
    }

    #[tokio::test]
    async fn test_defaults_accept() {
        let handler = LoggingHandler;
        let path = StreamPath::from_raw("/live/demo");
        let args = StreamArgs::new();
        assert!(handler.on_connection(&ctx()).await);
        assert_eq!(
            handler.authorize_subscribe(&ctx(), &path, &args).await,
            AuthResult::Accept
        );
    }

    #[tokio::test]
    async fn test_chained() {
        let path = StreamPath::from_raw("/live/demo");
        let args = StreamArgs::new();
        let req = PublishAuth {
            path: &path,
            args: &args,
            publish_type: "live",
        };

        let chained = ChainedHandler::new(Rename, DenyPlay);
        assert_eq!(
            chained.authorize_publish(&ctx(), &req).await,
            AuthResult::AcceptAs(StreamPath::from_raw("/live/renamed"))
        );
        assert!(chained
            .authorize_subscribe(&ctx(), &path, &args)
            .await
            .is_reject());
    }
}
