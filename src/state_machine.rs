//! 输出状态机模块
//!
//! 管理灯带输出的生命周期：熄灭、跟随主机画面、信号丢失，以及独占模式下的计时挂起

use crate::config::SIGNAL_TIMEOUT;
use embassy_time::{Duration, Instant};

/// 输出状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    /// 未收到过有效帧，或被主机清屏
    Dark,
    /// 正在显示主机画面
    Streaming,
    /// 超时未收到有效帧，灯带已熄灭
    SignalLost,
}

/// 输出事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputEvent {
    /// 一帧有效数据已写入灯带
    FrameApplied,
    /// 超过信号超时时间未收到有效帧
    SignalTimeout,
    /// 主机发送 clear
    Cleared,
}

/// 状态转换结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTransition {
    /// 保持当前状态
    Stay,
    /// 转换到新状态
    Transition(OutputState),
}

/// 状态机需要执行的动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// 清空输出缓冲并刷新灯带
    BlankOutput,
    /// 记录一次信号丢失
    RecordSignalLoss,
}

/// 输出状态机
pub struct OutputStateMachine {
    current_state: OutputState,
    previous_state: Option<OutputState>,
    last_valid_frame: Option<Instant>,
    signal_timeout: Duration,
    loss_count: u32,
    suspended_at: Option<Instant>,
}

impl OutputStateMachine {
    /// 创建新的状态机实例
    pub fn new() -> Self {
        Self::with_timeout(SIGNAL_TIMEOUT)
    }

    /// 使用自定义信号超时创建状态机
    pub fn with_timeout(signal_timeout: Duration) -> Self {
        Self {
            current_state: OutputState::Dark,
            previous_state: None,
            last_valid_frame: None,
            signal_timeout,
            loss_count: 0,
            suspended_at: None,
        }
    }

    /// 获取当前状态
    pub fn get_current_state(&self) -> OutputState {
        self.current_state
    }

    /// 获取上一个状态
    pub fn get_previous_state(&self) -> Option<OutputState> {
        self.previous_state
    }

    /// 输出是否由主机画面驱动
    pub fn output_active(&self) -> bool {
        self.current_state == OutputState::Streaming
    }

    /// 最近一帧有效数据的时间
    pub fn last_valid_frame(&self) -> Option<Instant> {
        self.last_valid_frame
    }

    /// 信号丢失次数
    pub fn loss_count(&self) -> u32 {
        self.loss_count
    }

    /// 计时是否被独占模式挂起
    pub fn is_suspended(&self) -> bool {
        self.suspended_at.is_some()
    }

    /// 记录有效帧
    pub fn frame_applied(&mut self, at: Instant) -> StateTransition {
        self.last_valid_frame = Some(at);
        self.handle_event(OutputEvent::FrameApplied)
    }

    /// 处理输出事件
    pub fn handle_event(&mut self, event: OutputEvent) -> StateTransition {
        let transition = self.get_state_transition(self.current_state, event);

        if let StateTransition::Transition(new_state) = transition {
            self.transition_to_state(new_state);
        }

        transition
    }

    /// 检查信号超时，返回需要执行的动作
    ///
    /// 每次丢失只触发一次：进入 `SignalLost` 后不再产生动作
    pub fn check_timeout(&mut self, now: Instant) -> alloc::vec::Vec<Action> {
        let mut actions = alloc::vec::Vec::new();

        if self.suspended_at.is_some() || self.current_state != OutputState::Streaming {
            return actions;
        }

        let expired = match self.last_valid_frame {
            Some(last) => now.saturating_duration_since(last) > self.signal_timeout,
            None => true,
        };

        if expired
            && self.handle_event(OutputEvent::SignalTimeout)
                == StateTransition::Transition(OutputState::SignalLost)
        {
            actions.push(Action::BlankOutput);
            actions.push(Action::RecordSignalLoss);
        }

        actions
    }

    /// 进入独占模式，冻结超时计时
    pub fn suspend(&mut self, now: Instant) {
        if self.suspended_at.is_none() {
            self.suspended_at = Some(now);
        }
    }

    /// 退出独占模式，按挂起时长平移最近帧时间
    pub fn resume(&mut self, now: Instant) {
        if let Some(since) = self.suspended_at.take() {
            let paused = now.saturating_duration_since(since);
            if let Some(last) = self.last_valid_frame {
                self.last_valid_frame = Some(last + paused);
            }
        }
    }

    /// 内部状态转换逻辑
    fn transition_to_state(&mut self, new_state: OutputState) {
        if new_state != self.current_state {
            match new_state {
                OutputState::SignalLost => {
                    self.loss_count += 1;
                    log!("[STATE] Signal lost (#{})", self.loss_count);
                }
                OutputState::Streaming => log!("[STATE] Output streaming"),
                OutputState::Dark => {}
            }

            self.previous_state = Some(self.current_state);
            self.current_state = new_state;
        }
    }

    /// 获取状态转换规则
    fn get_state_transition(
        &self,
        current_state: OutputState,
        event: OutputEvent,
    ) -> StateTransition {
        match (current_state, event) {
            // 任意状态收到有效帧都恢复输出
            (OutputState::Streaming, OutputEvent::FrameApplied) => StateTransition::Stay,
            (_, OutputEvent::FrameApplied) => StateTransition::Transition(OutputState::Streaming),

            // 只有正在输出时才会丢失信号
            (OutputState::Streaming, OutputEvent::SignalTimeout) => {
                StateTransition::Transition(OutputState::SignalLost)
            }

            // 清屏解除输出，不计为信号丢失
            (OutputState::Dark, OutputEvent::Cleared) => StateTransition::Stay,
            (_, OutputEvent::Cleared) => StateTransition::Transition(OutputState::Dark),

            // 默认情况：保持当前状态
            _ => StateTransition::Stay,
        }
    }
}

impl Default for OutputStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
