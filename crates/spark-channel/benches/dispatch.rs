use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use spark_channel::{
    Channel, ChannelError, ChannelHandler, ChannelHandlerContext, ChannelPromise, EventMask,
    HandlerResult, PipelineMessage, Transport,
};

/// 丢弃一切写入的传输层，避免基准迭代中累积内存。
struct Discard;

impl Transport for Discard {
    fn close(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    fn begin_read(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    fn write(&self, msg: PipelineMessage) -> Result<(), ChannelError> {
        drop(msg);
        Ok(())
    }

    fn flush(&self) -> Result<(), ChannelError> {
        Ok(())
    }

    fn is_open(&self) -> bool {
        true
    }

    fn is_active(&self) -> bool {
        true
    }
}

/// 只关心写操作的 Handler，入站事件应被掩码直接跳过。
struct WriteOnly;

impl ChannelHandler for WriteOnly {
    fn interest() -> EventMask {
        EventMask::WRITE
    }

    fn write(
        &self,
        ctx: &ChannelHandlerContext,
        msg: PipelineMessage,
        promise: ChannelPromise,
    ) -> HandlerResult {
        ctx.write_with(msg, promise).map(drop)
    }
}

/// 未声明兴趣的 Handler，每一跳都走默认转发实现。
struct Forwarding;

impl ChannelHandler for Forwarding {}

fn channel_with<H: ChannelHandler>(depth: usize, make: impl Fn() -> H) -> Channel {
    let channel = Channel::new(Discard);
    for i in 0..depth {
        channel
            .pipeline()
            .add_last(&format!("h{i}"), make())
            .expect("unique handler names");
    }
    channel
}

/// 比较入站事件穿过 N 个“被掩码跳过”与“默认转发”的 Handler 的成本。
///
/// 通道未注册，调度全部在调用线程内联完成，测得的是纯遍历与回调开销。
fn bench_inbound_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("fire_channel_read");
    for depth in [4usize, 16, 64] {
        let skipped = channel_with(depth, || WriteOnly);
        group.bench_with_input(BenchmarkId::new("masked", depth), &skipped, |b, channel| {
            b.iter(|| {
                channel
                    .pipeline()
                    .fire_channel_read(PipelineMessage::from_user(black_box(7u32)));
            })
        });

        let forwarding = channel_with(depth, || Forwarding);
        group.bench_with_input(
            BenchmarkId::new("forwarding", depth),
            &forwarding,
            |b, channel| {
                b.iter(|| {
                    channel
                        .pipeline()
                        .fire_channel_read(PipelineMessage::from_user(black_box(7u32)));
                })
            },
        );
    }
    group.finish();
}

fn bench_outbound_write(c: &mut Criterion) {
    let channel = channel_with(16, || WriteOnly);
    c.bench_function("write_16_handlers", |b| {
        b.iter(|| {
            let future = channel.write(PipelineMessage::from_bytes(black_box(&b"ping"[..])));
            black_box(future.is_success());
        })
    });
}

criterion_group!(dispatch_benches, bench_inbound_dispatch, bench_outbound_write);
criterion_main!(dispatch_benches);
