//! 协议扇出策略
//!
//! 一个逻辑服务名在注册中心中对应多个带协议后缀的服务名（`<name>.<protocol>`）。
//! 注册、注销、查询、订阅、取消订阅都必须使用 [`qualify`] 生成的同一份列表，
//! 否则写入与读取两侧会对不上，实例会"凭空消失"。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 支持的传输协议
///
/// 新增协议只需要修改这里。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Grpc,
}

impl Protocol {
    /// 扇出顺序
    pub const ALL: [Protocol; 2] = [Protocol::Http, Protocol::Grpc];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Grpc => "grpc",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "grpc" => Ok(Protocol::Grpc),
            _ => Err(format!("Unsupported protocol: {}", s)),
        }
    }
}

/// 带协议后缀的服务名，即注册中心里真正的注册/订阅键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualifiedName(String);

impl QualifiedName {
    pub fn new(service_name: &str, protocol: Protocol) -> Self {
        Self(format!("{}.{}", service_name, protocol.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 该名字携带的协议
    pub fn protocol(&self) -> Option<Protocol> {
        suffix_protocol(&self.0)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for QualifiedName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// 将逻辑服务名扇出为全部带协议后缀的服务名（顺序固定为 [`Protocol::ALL`]）
pub fn qualify(service_name: &str) -> Vec<QualifiedName> {
    Protocol::ALL
        .iter()
        .map(|protocol| QualifiedName::new(service_name, *protocol))
        .collect()
}

/// 从注册中心返回的服务名中推断协议
///
/// 注册中心可能在服务名前加上分组前缀（`DEFAULT_GROUP@@svc.grpc`），
/// 因此只看后缀。无法识别时返回调用方给定的默认协议。
pub fn protocol_of(qualified_name: &str, default: Protocol) -> Protocol {
    suffix_protocol(qualified_name).unwrap_or(default)
}

fn suffix_protocol(name: &str) -> Option<Protocol> {
    let (_, suffix) = name.rsplit_once('.')?;
    Protocol::ALL
        .into_iter()
        .find(|protocol| protocol.as_str() == suffix)
}
