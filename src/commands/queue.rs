use super::{HandlerResult, Reply};
use crate::broker::queue::SubscribeMode;
use crate::broker::{Broker, ConnectionId, Object};
use crate::protocol::{BodyReader, BodyWriter};
use crate::utils::error::BrokerError;
use crate::utils::validate::NAME_FIELD;

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

fn message(tag: u64, payload: Object) -> Reply {
    let mut prefix = BodyWriter::with_capacity(8);
    prefix.u64(tag);
    Reply::Payload {
        prefix: prefix.finish(),
        payload,
    }
}

pub(super) fn create(broker: &mut Broker, _: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.name()?;
    let max_messages = body.u32()?;
    let max_message_size = body.u32()?;
    let flags = body.u32()?;
    body.finish()?;

    broker.create_queue(name, max_messages, max_message_size, flags)?;
    Ok(Reply::Ok)
}

pub(super) fn declare(broker: &mut Broker, conn: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.name()?;
    body.finish()?;

    broker.declare_queue(conn, name)?;
    Ok(Reply::Ok)
}

pub(super) fn exist(broker: &mut Broker, _: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.name()?;
    body.finish()?;

    let mut out = BodyWriter::with_capacity(1);
    out.u8(broker.queue_id(name).is_some() as u8);
    Ok(Reply::Data(out.finish()))
}

/// name[64], max_msg, max_msg_size, flags, size, declared, subscribed.
pub(super) fn list(broker: &mut Broker, _: ConnectionId, body: BodyReader<'_>) -> HandlerResult {
    body.finish()?;

    let mut out = BodyWriter::new();
    for queue in broker.queues() {
        out.fixed(queue.name(), NAME_FIELD)
            .u32(queue.max_messages())
            .u32(queue.max_message_size())
            .u32(queue.flags())
            .u32(count(queue.len()))
            .u32(count(queue.declared_count()))
            .u32(count(queue.subscriber_count()));
    }
    Ok(Reply::Data(out.finish()))
}

pub(super) fn rename(broker: &mut Broker, _: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let from = body.name()?;
    let to = body.name()?;
    body.finish()?;

    broker.rename_queue(from, to)?;
    Ok(Reply::Ok)
}

pub(super) fn size(broker: &mut Broker, _: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.name()?;
    body.finish()?;

    let queue = broker.queue_by_name(name).ok_or(BrokerError::NotFound)?;
    let mut out = BodyWriter::with_capacity(4);
    out.u32(count(queue.len()));
    Ok(Reply::Data(out.finish()))
}

pub(super) fn push(broker: &mut Broker, conn: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.name()?;
    let expire_ms = body.u32()?;
    let payload = Object::copy_from_slice(body.payload()?);

    broker.push_queue(conn, name, payload, expire_ms)?;
    Ok(Reply::Ok)
}

pub(super) fn get(broker: &mut Broker, conn: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.name()?;
    body.finish()?;

    let (tag, payload) = broker.get_queue(conn, name)?;
    Ok(message(tag, payload))
}

pub(super) fn pop(broker: &mut Broker, conn: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.name()?;
    let timeout_ms = body.u32()?;
    body.finish()?;

    let (tag, payload) = broker.pop_queue(conn, name, timeout_ms)?;
    Ok(message(tag, payload))
}

pub(super) fn confirm(broker: &mut Broker, conn: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.name()?;
    let tag = body.u64()?;
    body.finish()?;

    broker.confirm_queue(conn, name, tag)?;
    Ok(Reply::Ok)
}

pub(super) fn subscribe(broker: &mut Broker, conn: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.name()?;
    let flags = body.u32()?;
    body.finish()?;

    broker.subscribe_queue(conn, name, SubscribeMode::from_flags(flags))?;
    Ok(Reply::Ok)
}

pub(super) fn unsubscribe(
    broker: &mut Broker,
    conn: ConnectionId,
    mut body: BodyReader<'_>,
) -> HandlerResult {
    let name = body.name()?;
    body.finish()?;

    broker.unsubscribe_queue(conn, name)?;
    Ok(Reply::Ok)
}

pub(super) fn purge(broker: &mut Broker, conn: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.name()?;
    body.finish()?;

    broker.purge_queue(conn, name)?;
    Ok(Reply::Ok)
}

pub(super) fn delete(broker: &mut Broker, _: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.name()?;
    body.finish()?;

    broker.delete_queue(name)?;
    Ok(Reply::Ok)
}
