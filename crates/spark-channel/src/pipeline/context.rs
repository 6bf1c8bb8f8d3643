use std::{
    any::Any,
    cell::Cell,
    fmt,
    net::SocketAddr,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, OnceLock, Weak,
        atomic::{AtomicU8, Ordering},
    },
};

use tracing::{trace, warn};

use super::{ChannelHandler, EventKind, EventMask, chain::Handle};
use crate::{
    attribute::AttributeKey,
    channel::{Channel, ChannelId, ChannelInner},
    error::{ChannelError, HandlerResult},
    message::PipelineMessage,
    promise::{ChannelFuture, ChannelPromise, Outcome, Promise},
    runtime::EventLoop,
};

const INIT: u8 = 0;
const ADD_PENDING: u8 = 1;
const ADD_COMPLETE: u8 = 2;
const REMOVE_COMPLETE: u8 = 3;

/// 节点生命周期。
///
/// 单调推进：`Init → AddPending → AddComplete → RemoveComplete`，允许 `Init` 直接进入
/// `AddComplete`；`RemoveComplete` 为终态。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerState {
    Init,
    AddPending,
    AddComplete,
    RemoveComplete,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Direction {
    Inbound,
    Outbound,
}

thread_local! {
    static EXCEPTION_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// 标记当前线程正处于某个 `exception_caught` 调用之内。
struct ExceptionScope;

impl ExceptionScope {
    fn enter() -> Self {
        EXCEPTION_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }

    fn active() -> bool {
        EXCEPTION_DEPTH.with(|depth| depth.get() > 0)
    }
}

impl Drop for ExceptionScope {
    fn drop(&mut self) {
        EXCEPTION_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// 执行 Handler 回调，把 panic 折算为 [`ChannelError::Panicked`]。
pub(crate) fn guarded(callback: impl FnOnce() -> HandlerResult) -> HandlerResult {
    panic::catch_unwind(AssertUnwindSafe(callback))
        .unwrap_or_else(|payload| Err(ChannelError::from_panic(payload)))
}

/// 入站事件。
pub(crate) enum Inbound {
    Registered,
    Unregistered,
    Active,
    Inactive,
    Read(PipelineMessage),
    ReadComplete,
    UserEvent(PipelineMessage),
    WritabilityChanged,
    Exception(ChannelError),
}

impl Inbound {
    fn kind(&self) -> EventKind {
        match self {
            Self::Registered => EventKind::ChannelRegistered,
            Self::Unregistered => EventKind::ChannelUnregistered,
            Self::Active => EventKind::ChannelActive,
            Self::Inactive => EventKind::ChannelInactive,
            Self::Read(_) => EventKind::ChannelRead,
            Self::ReadComplete => EventKind::ChannelReadComplete,
            Self::UserEvent(_) => EventKind::UserEventTriggered,
            Self::WritabilityChanged => EventKind::ChannelWritabilityChanged,
            Self::Exception(_) => EventKind::ExceptionCaught,
        }
    }

    fn deliver(self, handler: &dyn ChannelHandler, ctx: &ChannelHandlerContext) -> HandlerResult {
        match self {
            Self::Registered => handler.channel_registered(ctx),
            Self::Unregistered => handler.channel_unregistered(ctx),
            Self::Active => handler.channel_active(ctx),
            Self::Inactive => handler.channel_inactive(ctx),
            Self::Read(msg) => handler.channel_read(ctx, msg),
            Self::ReadComplete => handler.channel_read_complete(ctx),
            Self::UserEvent(event) => handler.user_event_triggered(ctx, event),
            Self::WritabilityChanged => handler.channel_writability_changed(ctx),
            Self::Exception(cause) => handler.exception_caught(ctx, cause),
        }
    }
}

/// 出站操作；Promise 单独传递。
pub(crate) enum Outbound {
    Bind(SocketAddr),
    Connect(SocketAddr, Option<SocketAddr>),
    Disconnect,
    Close,
    Deregister,
    Read,
    Write(PipelineMessage),
    Flush,
}

impl Outbound {
    fn kind(&self) -> EventKind {
        match self {
            Self::Bind(_) => EventKind::Bind,
            Self::Connect(..) => EventKind::Connect,
            Self::Disconnect => EventKind::Disconnect,
            Self::Close => EventKind::Close,
            Self::Deregister => EventKind::Deregister,
            Self::Read => EventKind::Read,
            Self::Write(_) => EventKind::Write,
            Self::Flush => EventKind::Flush,
        }
    }

    fn deliver(
        self,
        handler: &dyn ChannelHandler,
        ctx: &ChannelHandlerContext,
        promise: ChannelPromise,
    ) -> HandlerResult {
        match self {
            Self::Bind(local) => handler.bind(ctx, local, promise),
            Self::Connect(remote, local) => handler.connect(ctx, remote, local, promise),
            Self::Disconnect => handler.disconnect(ctx, promise),
            Self::Close => handler.close(ctx, promise),
            Self::Deregister => handler.deregister(ctx, promise),
            Self::Read => handler.read(ctx, promise),
            Self::Write(msg) => handler.write(ctx, msg, promise),
            Self::Flush => handler.flush(ctx, promise),
        }
    }
}

struct Retired {
    prev: Arc<ContextNode>,
    next: Arc<ContextNode>,
}

/// 链上的一个节点。名称、掩码与执行器在构造后不可变，只有生命周期状态会推进。
pub(crate) struct ContextNode {
    pub(crate) handle: Handle,
    pub(crate) name: String,
    pub(crate) type_name: &'static str,
    pub(crate) handler: Arc<dyn ChannelHandler>,
    pub(crate) mask: EventMask,
    executor: Option<Arc<dyn EventLoop>>,
    state: AtomicU8,
    channel: Weak<ChannelInner>,
    channel_id: ChannelId,
    retired: OnceLock<Retired>,
}

pub(crate) struct NodeSpec {
    pub(crate) name: String,
    pub(crate) type_name: &'static str,
    pub(crate) handler: Arc<dyn ChannelHandler>,
    pub(crate) mask: EventMask,
    pub(crate) executor: Option<Arc<dyn EventLoop>>,
}

impl ContextNode {
    pub(crate) fn new(
        handle: Handle,
        spec: NodeSpec,
        channel: Weak<ChannelInner>,
        channel_id: ChannelId,
    ) -> Arc<Self> {
        Arc::new(Self {
            handle,
            name: spec.name,
            type_name: spec.type_name,
            handler: spec.handler,
            mask: spec.mask,
            executor: spec.executor,
            state: AtomicU8::new(INIT),
            channel,
            channel_id,
            retired: OnceLock::new(),
        })
    }

    pub(crate) fn state(&self) -> HandlerState {
        match self.state.load(Ordering::Acquire) {
            INIT => HandlerState::Init,
            ADD_PENDING => HandlerState::AddPending,
            ADD_COMPLETE => HandlerState::AddComplete,
            _ => HandlerState::RemoveComplete,
        }
    }

    pub(crate) fn set_add_pending(&self) -> bool {
        self.state
            .compare_exchange(INIT, ADD_PENDING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// 推进到 `ADD_COMPLETE`；节点已被移除时返回 `false`。
    pub(crate) fn set_add_complete(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current == REMOVE_COMPLETE {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                ADD_COMPLETE,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn set_removed(&self) {
        self.state.store(REMOVE_COMPLETE, Ordering::Release);
    }

    fn is_eligible(&self) -> bool {
        match self.state.load(Ordering::Acquire) {
            ADD_COMPLETE => true,
            ADD_PENDING => self.executor.is_none(),
            _ => false,
        }
    }

    /// 记录摘除时刻的邻居，只在链写锁内调用一次。
    pub(crate) fn retire(&self, prev: Arc<ContextNode>, next: Arc<ContextNode>) {
        let _ = self.retired.set(Retired { prev, next });
    }

    pub(crate) fn retired_neighbour(&self, direction: Direction) -> Option<Arc<ContextNode>> {
        let retired = self.retired.get()?;
        Some(match direction {
            Direction::Inbound => Arc::clone(&retired.next),
            Direction::Outbound => Arc::clone(&retired.prev),
        })
    }

    /// 专属执行器优先，否则使用通道绑定的事件循环；通道尚未绑定时为 `None`。
    pub(crate) fn resolve_executor(&self) -> Option<Arc<dyn EventLoop>> {
        if let Some(executor) = &self.executor {
            return Some(Arc::clone(executor));
        }
        self.channel.upgrade()?.event_loop.get().cloned()
    }

    fn channel(&self) -> Option<Arc<ChannelInner>> {
        self.channel.upgrade()
    }
}

/// Handler 观察到的节点视图。
///
/// # 教案式说明
/// - **意图（Why）**：Handler 通过上下文把事件继续传给邻居、发起新的出站操作，
///   并访问所属通道；上下文本身是节点的廉价克隆句柄，可以被 Handler 保存下来稍后使用。
/// - **逻辑（How）**：每次调用都遵循同一协议：
///   1. 按方向（入站向后、出站向前）扫描邻居，跳过掩码不含该事件比特的节点，哨兵总是匹配；
///   2. 若当前线程就是目标节点绑定的事件循环则内联调用，否则包装为任务投递；
///   3. 调用前检查资格：`AddComplete`，或没有专属执行器的 `AddPending`；
///      不具备资格时事件被转交给同方向的下一个匹配节点而不是丢弃；
///   4. 入站回调的错误转为本节点上的 `exception_caught`；若错误发生在某个 `exception_caught`
///      调用之内则只记录日志。出站回调的错误直接失败该操作的 Promise。
/// - **契约（What）**：
///   - 入站方法返回 `&Self` 便于链式调用，出站方法返回 [`ChannelFuture`]；
///   - `*_with` 变体校验调用方提供的 Promise：已完成返回
///     [`ChannelError::PromiseAlreadyCompleted`]，已取消则跳过操作，属于其他通道返回
///     [`ChannelError::PromiseChannelMismatch`]；
///   - 已移除的上下文保留摘除时的邻居，仍能把事件转发给链上的存活节点。
#[derive(Clone)]
pub struct ChannelHandlerContext {
    node: Arc<ContextNode>,
}

impl ChannelHandlerContext {
    pub(crate) fn new(node: Arc<ContextNode>) -> Self {
        Self { node }
    }

    pub(crate) fn node(&self) -> &Arc<ContextNode> {
        &self.node
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn handler(&self) -> &Arc<dyn ChannelHandler> {
        &self.node.handler
    }

    /// 构造节点时计算出的兴趣掩码。
    pub fn interest(&self) -> EventMask {
        self.node.mask
    }

    pub fn state(&self) -> HandlerState {
        self.node.state()
    }

    pub fn is_removed(&self) -> bool {
        self.node.state() == HandlerState::RemoveComplete
    }

    pub fn channel_id(&self) -> ChannelId {
        self.node.channel_id
    }

    /// 所属通道；通道已被释放时为 `None`。
    pub fn channel(&self) -> Option<Channel> {
        self.node.channel().map(Channel::from_inner)
    }

    /// 回调实际运行的执行器。
    pub fn executor(&self) -> Option<Arc<dyn EventLoop>> {
        self.node.resolve_executor()
    }

    pub fn has_dedicated_executor(&self) -> bool {
        self.node.executor.is_some()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    /// 绑定到本通道与本节点执行器的新 Promise。
    pub fn new_promise(&self) -> ChannelPromise {
        Promise::for_channel(self.node.channel_id, self.node.resolve_executor())
    }

    pub fn new_succeeded_future(&self) -> ChannelFuture {
        let promise = self.new_promise();
        promise.try_success(());
        promise
    }

    pub fn new_failed_future(&self, cause: ChannelError) -> ChannelFuture {
        let promise = self.new_promise();
        promise.try_failure(cause);
        promise
    }

    /// 读取所属通道上的属性。
    pub fn attr<T: Any + Send + Sync>(&self, key: AttributeKey<T>) -> Option<Arc<T>> {
        self.channel()?.attr(key)
    }

    pub fn has_attr<T>(&self, key: AttributeKey<T>) -> bool {
        self.channel().is_some_and(|channel| channel.has_attr(key))
    }

    pub fn fire_channel_registered(&self) -> &Self {
        self.fire(Inbound::Registered)
    }

    pub fn fire_channel_unregistered(&self) -> &Self {
        self.fire(Inbound::Unregistered)
    }

    pub fn fire_channel_active(&self) -> &Self {
        self.fire(Inbound::Active)
    }

    pub fn fire_channel_inactive(&self) -> &Self {
        self.fire(Inbound::Inactive)
    }

    pub fn fire_channel_read(&self, msg: PipelineMessage) -> &Self {
        self.fire(Inbound::Read(msg))
    }

    pub fn fire_channel_read_complete(&self) -> &Self {
        self.fire(Inbound::ReadComplete)
    }

    pub fn fire_user_event_triggered(&self, event: PipelineMessage) -> &Self {
        self.fire(Inbound::UserEvent(event))
    }

    pub fn fire_channel_writability_changed(&self) -> &Self {
        self.fire(Inbound::WritabilityChanged)
    }

    pub fn fire_exception_caught(&self, cause: ChannelError) -> &Self {
        self.fire(Inbound::Exception(cause))
    }

    pub fn bind(&self, local: SocketAddr) -> ChannelFuture {
        self.outbound(Outbound::Bind(local))
    }

    pub fn bind_with(
        &self,
        local: SocketAddr,
        promise: ChannelPromise,
    ) -> Result<ChannelFuture, ChannelError> {
        self.outbound_with(Outbound::Bind(local), promise)
    }

    pub fn connect(&self, remote: SocketAddr, local: Option<SocketAddr>) -> ChannelFuture {
        self.outbound(Outbound::Connect(remote, local))
    }

    pub fn connect_with(
        &self,
        remote: SocketAddr,
        local: Option<SocketAddr>,
        promise: ChannelPromise,
    ) -> Result<ChannelFuture, ChannelError> {
        self.outbound_with(Outbound::Connect(remote, local), promise)
    }

    pub fn disconnect(&self) -> ChannelFuture {
        self.outbound(Outbound::Disconnect)
    }

    pub fn disconnect_with(&self, promise: ChannelPromise) -> Result<ChannelFuture, ChannelError> {
        self.outbound_with(Outbound::Disconnect, promise)
    }

    pub fn close(&self) -> ChannelFuture {
        self.outbound(Outbound::Close)
    }

    pub fn close_with(&self, promise: ChannelPromise) -> Result<ChannelFuture, ChannelError> {
        self.outbound_with(Outbound::Close, promise)
    }

    pub fn deregister(&self) -> ChannelFuture {
        self.outbound(Outbound::Deregister)
    }

    pub fn deregister_with(&self, promise: ChannelPromise) -> Result<ChannelFuture, ChannelError> {
        self.outbound_with(Outbound::Deregister, promise)
    }

    pub fn read(&self) -> ChannelFuture {
        self.outbound(Outbound::Read)
    }

    pub fn read_with(&self, promise: ChannelPromise) -> Result<ChannelFuture, ChannelError> {
        self.outbound_with(Outbound::Read, promise)
    }

    pub fn write(&self, msg: PipelineMessage) -> ChannelFuture {
        self.outbound(Outbound::Write(msg))
    }

    pub fn write_with(
        &self,
        msg: PipelineMessage,
        promise: ChannelPromise,
    ) -> Result<ChannelFuture, ChannelError> {
        self.outbound_with(Outbound::Write(msg), promise)
    }

    pub fn flush(&self) -> ChannelFuture {
        self.outbound(Outbound::Flush)
    }

    pub fn flush_with(&self, promise: ChannelPromise) -> Result<ChannelFuture, ChannelError> {
        self.outbound_with(Outbound::Flush, promise)
    }

    /// 写出并立即刷新；跨线程时写与刷新作为同一个任务投递。
    pub fn write_and_flush(&self, msg: PipelineMessage) -> ChannelFuture {
        let promise = self.new_promise();
        self.write_and_flush_internal(msg, promise.clone());
        promise
    }

    pub fn write_and_flush_with(
        &self,
        msg: PipelineMessage,
        promise: ChannelPromise,
    ) -> Result<ChannelFuture, ChannelError> {
        if self.accept(&promise)? {
            self.write_and_flush_internal(msg, promise.clone());
        }
        Ok(promise)
    }

    fn find(&self, mask: EventMask, direction: Direction) -> Option<Arc<ContextNode>> {
        let channel = self.node.channel()?;
        channel.pipeline.find(&self.node, mask, direction)
    }

    fn fire(&self, event: Inbound) -> &Self {
        let kind = event.kind();
        match self.find(kind.mask(), Direction::Inbound) {
            Some(next) => invoke_inbound(next, event),
            None => trace!(
                channel = %self.node.channel_id,
                handler = %self.node.name,
                event = %kind,
                "no inbound successor, event dropped"
            ),
        }
        self
    }

    fn outbound(&self, op: Outbound) -> ChannelFuture {
        let promise = self.new_promise();
        self.forward_outbound(op, promise.clone());
        promise
    }

    fn outbound_with(
        &self,
        op: Outbound,
        promise: ChannelPromise,
    ) -> Result<ChannelFuture, ChannelError> {
        if self.accept(&promise)? {
            self.forward_outbound(op, promise.clone());
        }
        Ok(promise)
    }

    /// 调用方 Promise 的复用校验；通道的关闭 Future 不能充当操作 Promise。
    fn accept(&self, promise: &ChannelPromise) -> Result<bool, ChannelError> {
        let accepted = promise.accept_for(self.node.channel_id)?;
        if let Some(channel) = self.node.channel()
            && promise.ptr_eq(&channel.close_future)
        {
            return Err(ChannelError::CloseFutureNotAllowed);
        }
        Ok(accepted)
    }

    fn forward_outbound(&self, op: Outbound, promise: ChannelPromise) {
        match self.find(op.kind().mask(), Direction::Outbound) {
            Some(next) => invoke_outbound(next, op, promise),
            None => {
                promise.try_failure(ChannelError::ChannelDropped);
            }
        }
    }

    fn write_and_flush_internal(&self, msg: PipelineMessage, promise: ChannelPromise) {
        let Some(next) = self.find(EventMask::WRITE | EventMask::FLUSH, Direction::Outbound) else {
            promise.try_failure(ChannelError::ChannelDropped);
            return;
        };
        match next.resolve_executor() {
            Some(executor) if !executor.in_event_loop() => {
                trace!(channel = %next.channel_id, handler = %next.name, "write_and_flush hops threads");
                let task_promise = promise.clone();
                let submitted = executor.execute(Box::new(move || {
                    handle_write_and_flush(next, msg, task_promise);
                }));
                if let Err(rejected) = submitted {
                    promise.try_failure(rejected.into());
                }
            }
            Some(_) => handle_write_and_flush(next, msg, promise),
            None => run_unbound(next, |next| handle_write_and_flush(next, msg, promise)),
        }
    }

    /// `write_and_flush` 内部刷新使用的 Promise：失败只记录日志。
    fn flush_promise(&self) -> ChannelPromise {
        let promise = self.new_promise();
        let channel = self.node.channel_id;
        let handler = self.node.name.clone();
        promise.add_listener(move |outcome| {
            if let Outcome::Failure(err) = outcome {
                warn!(%channel, %handler, error = %err, "flush issued by write_and_flush failed");
            }
        });
        promise
    }

    fn invoke_exception_caught(&self, cause: ChannelError) {
        let _scope = ExceptionScope::enter();
        let result = guarded(|| self.node.handler.exception_caught(self, cause.clone()));
        if let Err(err) = result {
            warn!(
                channel = %self.node.channel_id,
                handler = %self.node.name,
                error = %err,
                cause = %cause,
                "exception_caught failed, the failure is only logged"
            );
        }
    }

    fn notify_inbound_failure(&self, event: EventKind, cause: ChannelError) {
        if ExceptionScope::active() {
            warn!(
                channel = %self.node.channel_id,
                handler = %self.node.name,
                %event,
                error = %cause,
                "handler failed inside an exception_caught invocation, the failure is only logged"
            );
            return;
        }
        self.invoke_exception_caught(ChannelError::HandlerFailure {
            handler: self.node.name.clone(),
            event,
            cause: Box::new(cause),
        });
    }

    fn fail_outbound(&self, event: EventKind, promise: &ChannelPromise, cause: ChannelError) {
        let err = ChannelError::HandlerFailure {
            handler: self.node.name.clone(),
            event,
            cause: Box::new(cause),
        };
        if !promise.try_failure(err.clone()) && !promise.is_cancelled() {
            warn!(
                channel = %self.node.channel_id,
                handler = %self.node.name,
                %event,
                error = %err,
                "outbound handler failed after its promise was completed"
            );
        }
    }

    /// 推进到 `ADD_COMPLETE` 并调用 `handler_added`；节点已被移除时什么也不做。
    pub(crate) fn call_handler_added(&self) -> HandlerResult {
        if !self.node.set_add_complete() {
            return Ok(());
        }
        guarded(|| self.node.handler.handler_added(self))
    }

    /// 仅在 `ADD_COMPLETE` 时调用 `handler_removed`，随后无条件进入 `REMOVE_COMPLETE`。
    pub(crate) fn call_handler_removed(&self) -> HandlerResult {
        let result = if self.node.state() == HandlerState::AddComplete {
            guarded(|| self.node.handler.handler_removed(self))
        } else {
            Ok(())
        };
        self.node.set_removed();
        result
    }
}

impl fmt::Debug for ChannelHandlerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandlerContext")
            .field("name", &self.node.name)
            .field("handler", &self.node.type_name)
            .field("state", &self.node.state())
            .finish()
    }
}

/// 在目标节点的执行器上投递入站事件；被拒绝的事件记录日志后丢弃。
pub(crate) fn invoke_inbound(node: Arc<ContextNode>, event: Inbound) {
    match node.resolve_executor() {
        Some(executor) if !executor.in_event_loop() => {
            let kind = event.kind();
            let channel = node.channel_id;
            let handler = node.name.clone();
            trace!(%channel, %handler, event = %kind, "inbound event hops threads");
            let submitted = executor.execute(Box::new(move || handle_inbound(node, event)));
            if let Err(rejected) = submitted {
                warn!(%channel, %handler, event = %kind, %rejected, "inbound event rejected by the event loop, dropped");
            }
        }
        Some(_) => handle_inbound(node, event),
        None => run_unbound(node, |node| handle_inbound(node, event)),
    }
}

fn handle_inbound(node: Arc<ContextNode>, event: Inbound) {
    let ctx = ChannelHandlerContext::new(node);
    if !ctx.node.is_eligible() {
        ctx.fire(event);
        return;
    }
    let event = match event {
        Inbound::Exception(cause) => {
            ctx.invoke_exception_caught(cause);
            return;
        }
        other => other,
    };
    let kind = event.kind();
    let result = guarded(|| event.deliver(ctx.node.handler.as_ref(), &ctx));
    if let Err(cause) = result {
        ctx.notify_inbound_failure(kind, cause);
    }
}

pub(crate) fn invoke_outbound(node: Arc<ContextNode>, op: Outbound, promise: ChannelPromise) {
    match node.resolve_executor() {
        Some(executor) if !executor.in_event_loop() => {
            trace!(channel = %node.channel_id, handler = %node.name, event = %op.kind(), "outbound operation hops threads");
            let task_promise = promise.clone();
            let submitted = executor.execute(Box::new(move || {
                handle_outbound(node, op, task_promise);
            }));
            if let Err(rejected) = submitted {
                promise.try_failure(rejected.into());
            }
        }
        Some(_) => handle_outbound(node, op, promise),
        None => run_unbound(node, |node| handle_outbound(node, op, promise)),
    }
}

/// 通道尚未绑定事件循环时在调用线程内联执行，多个调用线程经由 pipeline 的调度锁串行。
fn run_unbound(node: Arc<ContextNode>, dispatch: impl FnOnce(Arc<ContextNode>)) {
    match node.channel() {
        Some(channel) => channel.pipeline.serialize_unbound(|| dispatch(node)),
        None => dispatch(node),
    }
}

fn handle_outbound(node: Arc<ContextNode>, op: Outbound, promise: ChannelPromise) {
    let ctx = ChannelHandlerContext::new(node);
    if !ctx.node.is_eligible() {
        ctx.forward_outbound(op, promise);
        return;
    }
    let kind = op.kind();
    let result = guarded(|| op.deliver(ctx.node.handler.as_ref(), &ctx, promise.clone()));
    if let Err(cause) = result {
        ctx.fail_outbound(kind, &promise, cause);
    }
}

fn handle_write_and_flush(node: Arc<ContextNode>, msg: PipelineMessage, promise: ChannelPromise) {
    let ctx = ChannelHandlerContext::new(node);
    if !ctx.node.is_eligible() {
        ctx.write_and_flush_internal(msg, promise);
        return;
    }
    let written = guarded(|| ctx.node.handler.write(&ctx, msg, promise.clone()));
    if let Err(cause) = written {
        ctx.fail_outbound(EventKind::Write, &promise, cause);
    }
    let flush = ctx.flush_promise();
    let flushed = guarded(|| ctx.node.handler.flush(&ctx, flush.clone()));
    if let Err(cause) = flushed {
        ctx.fail_outbound(EventKind::Flush, &flush, cause);
    }
}
