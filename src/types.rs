use bytes::Bytes;

/// 配置源产出的键值对
///
/// `value` 是配置文档原始内容，`format` 是格式标签（如 "yaml"），
/// 两者都原样透传，本库不解析。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Bytes,
    pub format: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<Bytes>, format: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            format: format.into(),
        }
    }

    /// 以 UTF-8 读取内容
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.value).ok()
    }
}
