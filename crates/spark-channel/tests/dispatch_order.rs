//! 事件传播顺序、掩码跳过与已移除上下文的转发。

mod support;

use std::sync::Arc;

use proptest::prelude::*;
use spark_channel::{
    ChannelHandler, ChannelHandlerContext, EventMask, HandlerResult, PipelineMessage,
    pipeline::HandlerState, test_stubs::TransportOp,
};
use support::{InboundOnly, Journal, OutboundOnly, Recording, channel, entries, journal};

#[test]
fn inbound_skips_handlers_without_interest() {
    let log = journal();
    let (channel, _transport) = channel();
    channel
        .pipeline()
        .add_last("a", OutboundOnly { name: "a", journal: Arc::clone(&log) })
        .unwrap()
        .add_last("b", Recording::new("b", &log))
        .unwrap();

    channel
        .pipeline()
        .fire_channel_read(PipelineMessage::from_user("ping"));

    assert_eq!(
        entries(&log),
        ["b:read:ping"],
        "未声明 CHANNEL_READ 兴趣的 a 不应被调用"
    );
}

#[test]
fn outbound_skips_handlers_without_interest() {
    let log = journal();
    let (channel, transport) = channel();
    channel
        .pipeline()
        .add_last("a", Recording::new("a", &log))
        .unwrap()
        .add_last("b", InboundOnly { name: "b", journal: Arc::clone(&log) })
        .unwrap();

    channel
        .write(PipelineMessage::from_user("pong"))
        .sync()
        .expect("write reaches the transport");

    assert_eq!(entries(&log), ["a:write:pong"]);
    assert_eq!(transport.ops(), [TransportOp::Write]);
}

#[test]
fn inbound_runs_head_to_tail_and_outbound_tail_to_head() {
    let log = journal();
    let (channel, _transport) = channel();
    let pipeline = channel.pipeline();
    pipeline
        .add_last("h1", Recording::new("h1", &log))
        .unwrap()
        .add_last("h2", Recording::new("h2", &log))
        .unwrap()
        .add_last("h3", Recording::new("h3", &log))
        .unwrap();

    pipeline.fire_channel_read(PipelineMessage::from_user("in"));
    channel
        .write(PipelineMessage::from_user("out"))
        .sync()
        .expect("write completes");

    assert_eq!(
        entries(&log),
        [
            "h1:read:in",
            "h2:read:in",
            "h3:read:in",
            "h3:write:out",
            "h2:write:out",
            "h1:write:out",
        ]
    );
}

#[test]
fn add_first_before_and_after_place_handlers() {
    let log = journal();
    let (channel, _transport) = channel();
    let pipeline = channel.pipeline();
    pipeline
        .add_last("m", Recording::new("m", &log))
        .unwrap()
        .add_first("f", Recording::new("f", &log))
        .unwrap()
        .add_before("m", "b", Recording::new("b", &log))
        .unwrap()
        .add_after("m", "a", Recording::new("a", &log))
        .unwrap();

    assert_eq!(pipeline.names(), ["f", "b", "m", "a"]);
    assert_eq!(pipeline.first_context().map(|c| c.name().to_owned()), Some("f".to_owned()));
    assert_eq!(pipeline.last_context().map(|c| c.name().to_owned()), Some("a".to_owned()));
}

/// 拦截读事件后改写消息再转发。
struct Upper;

impl ChannelHandler for Upper {
    fn interest() -> EventMask {
        EventMask::CHANNEL_READ
    }

    fn channel_read(&self, ctx: &ChannelHandlerContext, msg: PipelineMessage) -> HandlerResult {
        let text = support::text(&msg).to_uppercase();
        ctx.fire_channel_read(PipelineMessage::from_user(text));
        Ok(())
    }
}

#[test]
fn handlers_can_transform_messages_in_flight() {
    let log = journal();
    let (channel, _transport) = channel();
    channel
        .pipeline()
        .add_last("upper", Upper)
        .unwrap()
        .add_last("sink", Recording::new("sink", &log))
        .unwrap();

    channel
        .pipeline()
        .fire_channel_read(PipelineMessage::from_user("quiet"));

    assert_eq!(entries(&log), ["sink:read:QUIET"]);
}

#[test]
fn removed_context_keeps_forwarding_to_live_neighbour() {
    let log = journal();
    let (channel, _transport) = channel();
    let pipeline = channel.pipeline();
    pipeline
        .add_last("a", Recording::new("a", &log))
        .unwrap()
        .add_last("b", Recording::new("b", &log))
        .unwrap()
        .add_last("c", Recording::new("c", &log))
        .unwrap();

    let b = pipeline.remove("b").expect("b is present");
    assert_eq!(pipeline.names(), ["a", "c"]);

    b.fire_channel_read(PipelineMessage::from_user("late"));
    assert_eq!(
        entries(&log),
        ["c:read:late"],
        "已移除节点转发的事件应到达其摘除时的后继"
    );

    log.lock().clear();
    b.write(PipelineMessage::from_user("back"))
        .sync()
        .expect("write forwarded through the retired predecessor");
    assert_eq!(entries(&log), ["a:write:back"]);
}

#[test]
fn replaced_context_forwards_into_the_replacement() {
    let log = journal();
    let (channel, _transport) = channel();
    let pipeline = channel.pipeline();
    pipeline
        .add_last("a", Recording::new("a", &log))
        .unwrap()
        .add_last("old", Recording::new("old", &log))
        .unwrap()
        .add_last("z", Recording::new("z", &log))
        .unwrap();

    let old = pipeline
        .replace("old", "new", Recording::new("new", &log))
        .expect("replace succeeds");
    assert_eq!(old.name(), "old");
    assert_eq!(pipeline.names(), ["a", "new", "z"]);

    old.fire_channel_read(PipelineMessage::from_user("x"));
    assert_eq!(
        entries(&log),
        ["new:read:x", "z:read:x"],
        "被替换的上下文应把事件转发给替换者"
    );

    log.lock().clear();
    pipeline.fire_channel_read(PipelineMessage::from_user("y"));
    assert_eq!(entries(&log), ["a:read:y", "new:read:y", "z:read:y"]);
}

#[test]
fn pending_handler_without_dedicated_executor_receives_events() {
    let log = journal();
    let (channel, _transport) = channel();
    let pipeline = channel.pipeline();
    pipeline.add_last("early", Recording::new("early", &log)).unwrap();

    let ctx = pipeline.context("early").expect("linked");
    assert_eq!(ctx.state(), HandlerState::AddPending);

    pipeline.fire_channel_read(PipelineMessage::from_user("x"));
    assert_eq!(entries(&log), ["early:read:x"], "AddPending 节点不应丢失事件");
}

#[test]
fn pending_handler_with_dedicated_executor_is_bypassed() {
    let log = journal();
    let (channel, _transport) = channel();
    let dedicated = support::spawn_loop("dedicated-pending");
    let pipeline = channel.pipeline();
    pipeline
        .add_last_on(Arc::clone(&dedicated), "offloaded", Recording::new("offloaded", &log))
        .unwrap()
        .add_last("next", Recording::new("next", &log))
        .unwrap();

    assert!(pipeline.context("offloaded").unwrap().has_dedicated_executor());
    pipeline.fire_channel_read(PipelineMessage::from_user("x"));
    support::drain(&dedicated);

    assert_eq!(
        entries(&log),
        ["next:read:x"],
        "未完成添加的专属执行器节点应被跳过，事件交给下一个节点"
    );
}

#[derive(Clone, Copy, Debug)]
enum Slot {
    Both,
    InboundOnly,
    OutboundOnly,
}

fn slot() -> impl Strategy<Value = Slot> {
    prop_oneof![
        Just(Slot::Both),
        Just(Slot::InboundOnly),
        Just(Slot::OutboundOnly),
    ]
}

const NAMES: [&str; 8] = ["h0", "h1", "h2", "h3", "h4", "h5", "h6", "h7"];

fn install(slots: &[Slot], log: &Journal) -> spark_channel::Channel {
    let (channel, _transport) = channel();
    let pipeline = channel.pipeline();
    for (slot, name) in slots.iter().zip(NAMES) {
        let journal = Arc::clone(log);
        match slot {
            Slot::Both => pipeline.add_last(name, Recording { name, journal }),
            Slot::InboundOnly => pipeline.add_last(name, InboundOnly { name, journal }),
            Slot::OutboundOnly => pipeline.add_last(name, OutboundOnly { name, journal }),
        }
        .expect("unique name");
    }
    channel
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn propagation_visits_exactly_the_interested_handlers_in_order(
        slots in proptest::collection::vec(slot(), 1..NAMES.len())
    ) {
        let log = journal();
        let channel = install(&slots, &log);

        channel.pipeline().fire_channel_read(PipelineMessage::from_user("m"));
        let reads = entries(&log);
        let expected_reads: Vec<String> = slots
            .iter()
            .zip(NAMES)
            .filter_map(|(slot, name)| match slot {
                Slot::Both => Some(format!("{name}:read:m")),
                Slot::InboundOnly => Some(format!("{name}:read")),
                Slot::OutboundOnly => None,
            })
            .collect();
        prop_assert_eq!(reads, expected_reads);

        log.lock().clear();
        channel.write(PipelineMessage::from_user("m")).sync().unwrap();
        let writes = entries(&log);
        let expected_writes: Vec<String> = slots
            .iter()
            .zip(NAMES)
            .rev()
            .filter_map(|(slot, name)| match slot {
                Slot::Both => Some(format!("{name}:write:m")),
                Slot::OutboundOnly => Some(format!("{name}:write")),
                Slot::InboundOnly => None,
            })
            .collect();
        prop_assert_eq!(writes, expected_writes);
    }
}
