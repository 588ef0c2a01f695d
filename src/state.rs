// src/state.rs
use crate::types::{Identity, Participant, Role};
use dashmap::DashMap;
use socketioxide::socket::Sid;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// ==============================================================================
// 连接注册表: Sid -> 声明身份
// ==============================================================================

// 同一 userId 允许多个并发连接（多端登录），所以不做 userId 唯一约束。
// 广播扫描和注册/摘除会在持久化 await 点之间交错，DashMap 保证迭代中途可变安全。
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    conns: Arc<DashMap<Sid, Identity>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            conns: Arc::new(DashMap::new()),
        }
    }

    // 重复 register 直接覆盖旧身份（幂等）
    pub fn register(&self, sid: Sid, identity: Identity) {
        self.conns.insert(sid, identity);
    }

    pub fn lookup(&self, sid: Sid) -> Option<Identity> {
        self.conns.get(&sid).map(|e| e.value().clone())
    }

    pub fn remove(&self, sid: Sid) {
        self.conns.remove(&sid);
    }

    pub fn for_each(&self, mut visitor: impl FnMut(Sid, &Identity)) {
        for entry in self.conns.iter() {
            visitor(*entry.key(), entry.value());
        }
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }
}

// ==============================================================================
// 房间成员表: 房间名 -> { Sid -> Participant }
// ==============================================================================

#[derive(Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<DashMap<String, HashMap<Sid, Participant>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: Arc::new(DashMap::new()),
        }
    }

    // 首次 join 时惰性建房
    pub fn join(&self, room: &str, sid: Sid, participant: Participant) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(sid, participant);
    }

    // 房间或成员不存在时为 no-op，返回是否真的移除了成员
    pub fn leave(&self, room: &str, sid: Sid) -> bool {
        self.rooms
            .get_mut(room)
            .map(|mut e| e.remove(&sid).is_some())
            .unwrap_or(false)
    }

    pub fn participants_of(&self, room: &str) -> Vec<Participant> {
        self.rooms
            .get(room)
            .map(|e| e.values().cloned().collect())
            .unwrap_or_default()
    }

    // 在线人数口径：只数 role = student 的成员
    pub fn student_count(&self, room: &str) -> usize {
        self.rooms
            .get(room)
            .map(|e| e.values().filter(|p| p.role == Role::Student).count())
            .unwrap_or(0)
    }

    // 断连清理：扫全部房间摘除该连接，返回受影响的房间名（每个都要重发人数）
    pub fn remove_everywhere(&self, sid: Sid) -> Vec<String> {
        let mut affected = Vec::new();
        for mut entry in self.rooms.iter_mut() {
            if entry.value_mut().remove(&sid).is_some() {
                affected.push(entry.key().clone());
            }
        }
        affected
    }
}

// ==============================================================================
// 消息去重窗口: token -> 接收时刻
// ==============================================================================

// 只防客户端短时重发（双击/重连重放），不是跨会话的 exactly-once。
// 窗口内重见 token 则拒绝；条目由每 token 一个的定时器在保留期后清除，
// 即使 token 再也没被查过也会回收（定时驱动 GC，不依赖访问触发）。
#[derive(Clone)]
pub struct DedupWindow {
    seen: Arc<DashMap<String, Instant>>,
    reject_within: Duration,
    retention: Duration,
}

impl DedupWindow {
    pub fn new(reject_within: Duration, retention: Duration) -> Self {
        Self {
            seen: Arc::new(DashMap::new()),
            reject_within,
            retention,
        }
    }

    // check-and-set：接受即写入当前时刻；拒绝不刷新时间戳。
    // entry 持有分片锁，检查与写入原子完成，并发同 token 只会放行一个
    pub fn should_accept(&self, token: &str) -> bool {
        let now = Instant::now();
        let mut accepted = true;
        let entry = self
            .seen
            .entry(token.to_string())
            .and_modify(|at| {
                if now.duration_since(*at) < self.reject_within {
                    accepted = false;
                } else {
                    *at = now;
                }
            })
            .or_insert(now);
        drop(entry);
        if !accepted {
            return false;
        }

        let seen = self.seen.clone();
        let token = token.to_string();
        let retention = self.retention;
        tokio::spawn(async move {
            tokio::time::sleep_until(now + retention).await;
            // 只清理本次写入的条目，旧定时器不能误删后来刷新的新条目
            seen.remove_if(&token, |_, at| *at == now);
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(user_id: &str, cohort: Option<&str>) -> Identity {
        Identity {
            user_id: user_id.to_string(),
            display_name: user_id.to_uppercase(),
            role: Role::Student,
            cohort: cohort.map(|c| c.to_string()),
        }
    }

    fn participant(user_id: &str, role: Role) -> Participant {
        Participant {
            user_id: user_id.to_string(),
            display_name: user_id.to_uppercase(),
            role,
        }
    }

    #[test]
    fn register_overwrites_and_lookup_roundtrips() {
        let registry = ConnectionRegistry::new();
        let sid = Sid::new();
        registry.register(sid, identity("u1", Some("morning")));
        registry.register(sid, identity("u1", Some("evening")));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup(sid).unwrap().cohort.as_deref(), Some("evening"));
        registry.remove(sid);
        assert!(registry.lookup(sid).is_none());
    }

    #[test]
    fn student_count_ignores_representatives() {
        let rooms = RoomRegistry::new();
        rooms.join("101", Sid::new(), participant("s1", Role::Student));
        rooms.join("101", Sid::new(), participant("s2", Role::Student));
        rooms.join("101", Sid::new(), participant("rep", Role::Representative));
        assert_eq!(rooms.student_count("101"), 2);
        assert_eq!(rooms.participants_of("101").len(), 3);
        assert_eq!(rooms.student_count("nope"), 0);
    }

    #[test]
    fn leave_is_noop_for_unknown_room_or_member() {
        let rooms = RoomRegistry::new();
        let sid = Sid::new();
        assert!(!rooms.leave("101", sid));
        rooms.join("101", sid, participant("s1", Role::Student));
        assert!(!rooms.leave("101", Sid::new()));
        assert!(rooms.leave("101", sid));
        assert_eq!(rooms.student_count("101"), 0);
    }

    #[test]
    fn remove_everywhere_reports_every_affected_room() {
        let rooms = RoomRegistry::new();
        let sid = Sid::new();
        let other = Sid::new();
        rooms.join("101", sid, participant("s1", Role::Student));
        rooms.join("102", sid, participant("s1", Role::Student));
        rooms.join("103", other, participant("s2", Role::Student));

        let mut affected = rooms.remove_everywhere(sid);
        affected.sort();
        assert_eq!(affected, vec!["101".to_string(), "102".to_string()]);
        assert_eq!(rooms.student_count("101"), 0);
        assert_eq!(rooms.student_count("103"), 1);
        // 第二次清理已无残留
        assert!(rooms.remove_everywhere(sid).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dedup_rejects_within_window_and_forgets_after_retention() {
        let window = DedupWindow::new(Duration::from_secs(5), Duration::from_secs(10));
        assert!(window.should_accept("t1"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!window.should_accept("t1"));

        // 拒绝不刷新时间戳：10 秒后定时器照常清掉首次写入
        tokio::time::advance(Duration::from_secs(9)).await;
        tokio::task::yield_now().await;
        assert!(window.should_accept("t1"));
    }

    #[tokio::test(start_paused = true)]
    async fn dedup_tracks_tokens_independently() {
        let window = DedupWindow::new(Duration::from_secs(5), Duration::from_secs(10));
        assert!(window.should_accept("t1"));
        assert!(window.should_accept("t2"));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!window.should_accept("t1"));
        assert!(!window.should_accept("t2"));
    }

    // 多 worker 下同 token 同时到达，check-and-set 必须恰好放行一个
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn dedup_accepts_exactly_once_under_contention() {
        use tokio::sync::Barrier;

        let window = DedupWindow::new(Duration::from_secs(5), Duration::from_secs(10));
        for i in 0..200 {
            let token = format!("t{}", i);
            let barrier = Arc::new(Barrier::new(2));

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let window = window.clone();
                    let token = token.clone();
                    let barrier = barrier.clone();
                    tokio::spawn(async move {
                        barrier.wait().await;
                        window.should_accept(&token)
                    })
                })
                .collect();

            let mut accepted = 0;
            for handle in handles {
                if handle.await.unwrap() {
                    accepted += 1;
                }
            }
            assert_eq!(accepted, 1, "token {} accepted {} times", token, accepted);
        }
    }
}
