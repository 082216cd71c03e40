//! Session lifecycle: connect, disconnect, scoped use, cookie handling.

use crate::api::VimApi;
use crate::error::{VsphereError, VsphereResult};
use crate::types::VsphereConfig;
use crate::vsphere::SoapClient;

use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Open a session. Certificate validation follows `config.insecure`
/// (disabled unless the caller turns it back on).
pub async fn connect(config: &VsphereConfig) -> VsphereResult<SoapClient> {
    SoapClient::connect(config).await.map_err(|e| {
        log::warn!("Connecting to {} failed: {e}", config.host);
        e
    })
}

/// Release a session. Failure is logged and reported, never propagated.
pub async fn disconnect(session: &dyn VimApi) -> bool {
    match session.logout().await {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Disconnect failed: {e}");
            false
        }
    }
}

/// Run `f` with `session`, then release the session however `f` ends.
///
/// A panic inside `f` is resumed once the session has been released.
pub async fn run_scoped<A, F, Fut, T>(session: Arc<A>, f: F) -> T
where
    A: VimApi + 'static,
    F: FnOnce(Arc<A>) -> Fut,
    Fut: Future<Output = T>,
{
    let outcome = AssertUnwindSafe(f(session.clone())).catch_unwind().await;
    disconnect(&*session).await;
    match outcome {
        Ok(value) => value,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Connect, run `f` with the session, and always disconnect afterwards.
pub async fn with_session<F, Fut, T>(config: &VsphereConfig, f: F) -> VsphereResult<T>
where
    F: FnOnce(Arc<SoapClient>) -> Fut,
    Fut: Future<Output = T>,
{
    let session = Arc::new(connect(config).await?);
    Ok(run_scoped(session, f).await)
}

/// Turn the raw session cookie into the form the `/folder` endpoint wants.
///
/// `vmware_soap_session="abc"; Path=/; HttpOnly` becomes
/// `{"vmware_soap_session": " \"abc\"; $Path=/"}`. Input without `=` or
/// without a `;`-separated attribute is rejected.
pub fn session_cookie_to_map(raw: Option<&str>) -> VsphereResult<HashMap<String, String>> {
    let raw = raw.ok_or_else(|| VsphereError::auth("Session has no cookie"))?;
    let (name, rest) = raw
        .split_once('=')
        .ok_or_else(|| VsphereError::parse(format!("Malformed session cookie (no '='): {raw:?}")))?;
    let (value, attrs) = rest
        .split_once(';')
        .ok_or_else(|| VsphereError::parse(format!("Malformed session cookie (no ';'): {raw:?}")))?;
    let path = attrs.split(';').next().unwrap_or_default().trim_start();

    Ok(HashMap::from([(name.to_string(), format!(" {value}; ${path}"))]))
}
