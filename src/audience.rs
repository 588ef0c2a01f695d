// src/audience.rs
use crate::state::ConnectionRegistry;
use socketioxide::socket::Sid;
use std::collections::HashSet;

pub const DEFAULT_COHORT: &str = "morning";

// 受众成员：投递按连接，持久化按 user_id 去重（见 dispatch::notify_audience）
#[derive(Debug, Clone)]
pub struct AudienceMember {
    pub sid: Sid,
    pub user_id: String,
}

// 分组值是自由字符串，统一小写比较；空/缺省一律归到 "morning"
pub fn normalize_cohort(raw: Option<&str>) -> String {
    match raw {
        Some(s) if !s.trim().is_empty() => s.trim().to_lowercase(),
        _ => DEFAULT_COHORT.to_string(),
    }
}

// 扫描连接注册表，选出分组匹配且不在排除名单里的所有活动连接。
// 同一 userId 的多端连接全部入选（持久化去重在下游做）。
pub fn select_by_cohort(
    registry: &ConnectionRegistry,
    cohort: &str,
    exclude: &HashSet<String>,
) -> Vec<AudienceMember> {
    let target = normalize_cohort(Some(cohort));
    let mut members = Vec::new();
    registry.for_each(|sid, identity| {
        if exclude.contains(&identity.user_id) {
            return;
        }
        if normalize_cohort(identity.cohort.as_deref()) == target {
            members.push(AudienceMember {
                sid,
                user_id: identity.user_id.clone(),
            });
        }
    });
    members
}
