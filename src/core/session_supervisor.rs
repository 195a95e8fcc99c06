//! 会话监管：取消令牌的生命周期
//!
//! 持有当前 CancellationToken；用户 Ctrl+C / :reset 时取消，下一次 run 开始前换新令牌。

use std::sync::Mutex;

use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct SessionSupervisor {
    cancel_token: Mutex<CancellationToken>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// 触发取消；正在进行的 run 在下一个步骤边界停止
    pub fn cancel(&self) {
        self.cancel_token
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .cancel();
    }

    /// 开始新 run：若旧令牌已取消则换新，返回本次 run 使用的令牌
    pub fn begin_run(&self) -> CancellationToken {
        let mut guard = self.cancel_token.lock().unwrap_or_else(|p| p.into_inner());
        if guard.is_cancelled() {
            *guard = CancellationToken::new();
        }
        guard.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_cancelled()
    }
}
