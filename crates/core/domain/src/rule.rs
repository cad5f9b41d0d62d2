use serde::{Deserialize, Serialize};

/// 规则：脚本体 + 绑定关系。
///
/// `actions` 必须定义全局函数 `Action(data)`；`success` / `failed`
/// 可选，分别定义 `Success()` 与 `Failed(err)`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub device: Option<String>,
    /// 脚本返回非空字符串时转发到的目标 UUID
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub success: String,
    pub actions: String,
    #[serde(default)]
    pub failed: String,
    #[serde(default)]
    pub description: String,
}

impl Rule {
    /// 拼接出规则 VM 的完整脚本源码。
    pub fn script_source(&self) -> String {
        let mut source = String::with_capacity(
            self.actions.len() + self.success.len() + self.failed.len() + 2,
        );
        source.push_str(&self.actions);
        if !self.success.trim().is_empty() {
            source.push('\n');
            source.push_str(&self.success);
        }
        if !self.failed.trim().is_empty() {
            source.push('\n');
            source.push_str(&self.failed);
        }
        source
    }

    /// 规则是否绑定到给定来源（源或设备）。
    pub fn bound_to(&self, origin_uuid: &str) -> bool {
        self.source.as_deref() == Some(origin_uuid) || self.device.as_deref() == Some(origin_uuid)
    }
}
