//! Nacos 后端
//!
//! 基于 Nacos v1 Open API（HTTP）实现 [`NamingClient`](super::NamingClient) 与
//! [`ConfigClient`](super::ConfigClient)：
//! - 请求在多个服务端地址间轮转，传输错误时切换到下一个地址
//! - 配置了用户名/密码时先登录，accessToken 过期或返回 403 时重新登录
//! - 临时实例由后台心跳任务续约，订阅/监听由后台任务轮询（即后端自己的通知上下文）
//!
//! 所有后台任务都挂在同一个根取消令牌下，[`NacosBackend`] 释放时统一退出。

mod config;
mod naming;

use parking_lot::{Mutex, RwLock};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::SubscriptionId;
use crate::config::BridgeConfig;
use crate::error::{BackendError, BackendResult};

/// accessToken 提前刷新的余量
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// Nacos HTTP 客户端
///
/// 克隆开销很小，克隆体共享连接与后台任务。
#[derive(Clone)]
pub struct NacosBackend {
    inner: Arc<NacosInner>,
    // 最后一个句柄释放时停止后台任务
    _guard: Arc<ShutdownGuard>,
}

struct ShutdownGuard(CancellationToken);

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginResponse {
    access_token: String,
    #[serde(default = "default_token_ttl")]
    token_ttl: u64,
}

fn default_token_ttl() -> u64 {
    18_000
}

/// 一次 HTTP 调用的描述
struct Call<'a> {
    method: Method,
    path: &'a str,
    query: Vec<(&'static str, String)>,
    form: Vec<(&'static str, String)>,
    headers: Vec<(&'static str, String)>,
    timeout: Duration,
}

impl<'a> Call<'a> {
    fn new(method: Method, path: &'a str, timeout: Duration) -> Self {
        Self {
            method,
            path,
            query: Vec::new(),
            form: Vec::new(),
            headers: Vec::new(),
            timeout,
        }
    }

    fn query(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.query.push((key, value.into()));
        self
    }

    fn form(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.form.push((key, value.into()));
        self
    }

    fn header(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((key, value.into()));
        self
    }
}

pub(crate) struct NacosInner {
    http: reqwest::Client,
    /// 形如 `http://127.0.0.1:8848/nacos`
    servers: Vec<String>,
    cursor: AtomicUsize,
    namespace: String,
    username: Option<String>,
    password: Option<String>,
    token: RwLock<Option<AccessToken>>,
    timeout: Duration,
    poll_interval: Duration,
    long_poll_timeout: Duration,
    beats: Mutex<HashMap<String, CancellationToken>>,
    subscriptions: Mutex<HashMap<SubscriptionId, CancellationToken>>,
    listeners: Mutex<HashMap<SubscriptionId, CancellationToken>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl NacosBackend {
    /// 创建客户端；配置了凭据时立即登录
    pub async fn connect(config: &BridgeConfig) -> BackendResult<Self> {
        let context_path = normalize_context_path(&config.context_path);
        let servers: Vec<String> = config
            .server_addrs
            .iter()
            .map(|addr| server_base_url(addr, &context_path))
            .collect();
        if servers.is_empty() {
            return Err(BackendError::Unavailable(
                "no nacos server address configured".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        let shutdown = CancellationToken::new();
        let inner = Arc::new(NacosInner {
            http,
            servers,
            cursor: AtomicUsize::new(0),
            namespace: config.namespace.clone(),
            username: config.username.clone().filter(|u| !u.is_empty()),
            password: config.password.clone(),
            token: RwLock::new(None),
            timeout: Duration::from_millis(config.timeout_ms),
            poll_interval: Duration::from_secs(config.registry.heartbeat_interval_secs.max(1)),
            long_poll_timeout: Duration::from_millis(config.config.long_poll_timeout_ms),
            beats: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            shutdown: shutdown.clone(),
        });

        if inner.username.is_some() {
            inner.login().await?;
        }

        info!(
            servers = ?inner.servers,
            namespace = %inner.namespace,
            "✅ Nacos client created"
        );

        Ok(Self {
            inner,
            _guard: Arc::new(ShutdownGuard(shutdown)),
        })
    }

    /// 停止所有心跳、订阅和监听任务
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }
}

impl NacosInner {
    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn has_credentials(&self) -> bool {
        self.username.is_some()
    }

    /// 当前有效的 accessToken
    fn current_token(&self) -> Option<String> {
        self.token
            .read()
            .as_ref()
            .filter(|t| t.expires_at > Instant::now())
            .map(|t| t.value.clone())
    }

    /// 登录，依次尝试每个服务端地址
    async fn login(&self) -> BackendResult<()> {
        let (Some(username), password) = (self.username.as_deref(), self.password.as_deref()) else {
            return Ok(());
        };

        let mut last_err = None;
        for base in &self.servers {
            let url = format!("{}/v1/auth/login", base);
            let result = self
                .http
                .post(&url)
                .form(&[("username", username), ("password", password.unwrap_or_default())])
                .timeout(self.timeout)
                .send()
                .await;

            let resp = match result {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(server = %base, error = %e, "Nacos login request failed");
                    last_err = Some(BackendError::Http(e));
                    continue;
                }
            };

            let status = resp.status();
            let body = resp.text().await?;
            if !status.is_success() {
                return Err(BackendError::Rejected(format!(
                    "nacos login failed with status {}: {}",
                    status.as_u16(),
                    body
                )));
            }

            let login: LoginResponse = serde_json::from_str(&body)?;
            let ttl = Duration::from_secs(login.token_ttl).saturating_sub(TOKEN_REFRESH_MARGIN);
            *self.token.write() = Some(AccessToken {
                value: login.access_token,
                expires_at: Instant::now() + ttl,
            });
            debug!(server = %base, "Nacos login succeeded");
            return Ok(());
        }

        Err(last_err.unwrap_or_else(|| BackendError::Unavailable("nacos login failed".to_string())))
    }

    /// 发送请求并返回响应体
    ///
    /// 传输错误时轮转到下一个地址；403 时重新登录并重试一次。
    async fn execute(&self, call: &Call<'_>) -> BackendResult<String> {
        if self.has_credentials() && self.current_token().is_none() {
            self.login().await?;
        }

        let mut relogged = false;
        let mut last_err = None;
        let mut attempts = 0;

        while attempts < self.servers.len() {
            let index = self.cursor.load(Ordering::Relaxed) % self.servers.len();
            let base = &self.servers[index];

            let mut query = call.query.clone();
            if let Some(token) = self.current_token() {
                query.push(("accessToken", token));
            }

            let mut builder = self
                .http
                .request(call.method.clone(), format!("{}{}", base, call.path))
                .query(&query)
                .timeout(call.timeout);
            if !call.form.is_empty() {
                builder = builder.form(&call.form);
            }
            for (key, value) in &call.headers {
                builder = builder.header(*key, value.as_str());
            }

            let resp = match builder.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(server = %base, path = %call.path, error = %e, "Nacos request failed, trying next server");
                    self.cursor.store(index + 1, Ordering::Relaxed);
                    last_err = Some(BackendError::Http(e));
                    attempts += 1;
                    continue;
                }
            };

            let status = resp.status();
            if status == StatusCode::FORBIDDEN && self.has_credentials() && !relogged {
                debug!(path = %call.path, "Nacos access token rejected, logging in again");
                relogged = true;
                self.token.write().take();
                self.login().await?;
                continue;
            }

            let body = resp.text().await?;
            if !status.is_success() {
                return Err(BackendError::Status {
                    status: status.as_u16(),
                    body,
                });
            }
            return Ok(body);
        }

        Err(last_err.unwrap_or_else(|| BackendError::Unavailable("no nacos server reachable".to_string())))
    }
}

/// 上下文路径规范化为 "/xxx"，空路径保持为空
fn normalize_context_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}

fn server_base_url(addr: &str, context_path: &str) -> String {
    let addr = addr.trim().trim_end_matches('/');
    if addr.starts_with("http://") || addr.starts_with("https://") {
        format!("{}{}", addr, context_path)
    } else {
        format!("http://{}{}", addr, context_path)
    }
}
