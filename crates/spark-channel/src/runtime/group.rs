use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use tracing::debug;

use super::{EventLoop, EventLoopGroup, SingleThreadEventLoop};
use crate::{config::EventLoopGroupConfig, error::ChannelError, promise::Promise};

/// 轮询选择器。
///
/// 循环数量为 2 的幂时以位掩码代替取模；两种分支的分配序列完全相同，都是确定性的轮询。
#[derive(Debug)]
pub enum EventLoopChooser {
    PowerOfTwo { index: AtomicUsize, mask: usize },
    Generic { index: AtomicUsize, len: usize },
}

impl EventLoopChooser {
    /// `len` 必须大于零。
    pub fn new(len: usize) -> Self {
        let index = AtomicUsize::new(0);
        if len.is_power_of_two() {
            Self::PowerOfTwo {
                index,
                mask: len - 1,
            }
        } else {
            Self::Generic { index, len }
        }
    }

    pub fn next_index(&self) -> usize {
        match self {
            Self::PowerOfTwo { index, mask } => index.fetch_add(1, Ordering::Relaxed) & mask,
            Self::Generic { index, len } => index.fetch_add(1, Ordering::Relaxed) % len,
        }
    }
}

/// 由若干 [`SingleThreadEventLoop`] 组成的默认循环组。
pub struct DefaultEventLoopGroup {
    loops: Vec<Arc<SingleThreadEventLoop>>,
    chooser: EventLoopChooser,
}

impl DefaultEventLoopGroup {
    /// 按配置启动全部循环；任一线程派生失败时已启动的循环会被关闭。
    pub fn new(config: &EventLoopGroupConfig) -> Result<Self, ChannelError> {
        config.validate()?;
        let threads = config.resolved_threads();
        let mut loops = Vec::with_capacity(threads);
        for index in 0..threads {
            let name = format!("{}-{index}", config.thread_name_prefix);
            match SingleThreadEventLoop::spawn_with_capacity(name, config.max_pending_tasks) {
                Ok(event_loop) => loops.push(event_loop),
                Err(err) => {
                    for started in &loops {
                        started.shutdown_gracefully();
                    }
                    return Err(err);
                }
            }
        }
        debug!(threads, prefix = %config.thread_name_prefix, "event loop group started");
        Ok(Self {
            chooser: EventLoopChooser::new(loops.len()),
            loops,
        })
    }

    pub fn with_threads(threads: usize) -> Result<Self, ChannelError> {
        Self::new(&EventLoopGroupConfig::with_threads(threads))
    }

    pub fn loops(&self) -> &[Arc<SingleThreadEventLoop>] {
        &self.loops
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }
}

impl EventLoopGroup for DefaultEventLoopGroup {
    fn next(&self) -> Arc<dyn EventLoop> {
        let event_loop: Arc<dyn EventLoop> = self.loops[self.chooser.next_index()].clone();
        event_loop
    }

    fn shutdown_gracefully(&self) -> Promise<()> {
        let all = Promise::new();
        let remaining = Arc::new(AtomicUsize::new(self.loops.len()));
        for event_loop in &self.loops {
            let all = all.clone();
            let remaining = Arc::clone(&remaining);
            event_loop.shutdown_gracefully().add_listener(move |_| {
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    all.try_success(());
                }
            });
        }
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chooser_round_robins_for_both_shapes() {
        for len in [1usize, 3, 4] {
            let chooser = EventLoopChooser::new(len);
            let picks: Vec<_> = (0..len * 3).map(|_| chooser.next_index()).collect();
            let expected: Vec<_> = (0..len * 3).map(|i| i % len).collect();
            assert_eq!(picks, expected, "len = {len}");
        }
    }

    #[test]
    fn group_hands_out_loops_in_rotation_and_shuts_down() {
        let group = DefaultEventLoopGroup::with_threads(3).expect("group");
        let names: Vec<String> = (0..6).map(|_| group.next().name().to_owned()).collect();
        assert_eq!(
            names,
            [
                "spark-loop-0",
                "spark-loop-1",
                "spark-loop-2",
                "spark-loop-0",
                "spark-loop-1",
                "spark-loop-2"
            ]
        );
        group.shutdown_gracefully().sync().expect("all loops terminate");
        assert!(group.loops().iter().all(|l| l.is_terminated()));
    }
}
