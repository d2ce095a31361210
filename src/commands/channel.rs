use super::{HandlerResult, Reply};
use crate::broker::{Broker, ConnectionId, Object};
use crate::protocol::{BodyReader, BodyWriter};
use crate::utils::validate::NAME_FIELD;

pub(super) fn create(broker: &mut Broker, _: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.name()?;
    let flags = body.u32()?;
    body.finish()?;

    broker.create_channel(name, flags)?;
    Ok(Reply::Ok)
}

pub(super) fn exist(broker: &mut Broker, _: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.name()?;
    body.finish()?;

    let mut out = BodyWriter::with_capacity(1);
    out.u8(broker.channel_id(name).is_some() as u8);
    Ok(Reply::Data(out.finish()))
}

/// name[64], flags, topic count, pattern count.
pub(super) fn list(broker: &mut Broker, _: ConnectionId, body: BodyReader<'_>) -> HandlerResult {
    body.finish()?;

    let count = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);
    let mut out = BodyWriter::new();
    for channel in broker.channels() {
        out.fixed(channel.name(), NAME_FIELD)
            .u32(channel.flags())
            .u32(count(channel.topic_count()))
            .u32(count(channel.pattern_count()));
    }
    Ok(Reply::Data(out.finish()))
}

pub(super) fn rename(broker: &mut Broker, _: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let from = body.name()?;
    let to = body.name()?;
    body.finish()?;

    broker.rename_channel(from, to)?;
    Ok(Reply::Ok)
}

pub(super) fn publish(broker: &mut Broker, _: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.name()?;
    let topic = body.topic()?;
    let payload = Object::copy_from_slice(body.payload()?);

    broker.publish(name, topic, payload)?;
    Ok(Reply::Ok)
}

pub(super) fn subscribe(broker: &mut Broker, conn: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.name()?;
    let topic = body.topic()?;
    body.finish()?;

    broker.subscribe_channel(conn, name, topic)?;
    Ok(Reply::Ok)
}

pub(super) fn psubscribe(broker: &mut Broker, conn: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.name()?;
    let pattern = body.pattern()?;
    body.finish()?;

    broker.psubscribe_channel(conn, name, pattern)?;
    Ok(Reply::Ok)
}

pub(super) fn unsubscribe(
    broker: &mut Broker,
    conn: ConnectionId,
    mut body: BodyReader<'_>,
) -> HandlerResult {
    let name = body.name()?;
    let topic = body.topic()?;
    body.finish()?;

    broker.unsubscribe_channel(conn, name, topic)?;
    Ok(Reply::Ok)
}

pub(super) fn punsubscribe(
    broker: &mut Broker,
    conn: ConnectionId,
    mut body: BodyReader<'_>,
) -> HandlerResult {
    let name = body.name()?;
    let pattern = body.pattern()?;
    body.finish()?;

    broker.punsubscribe_channel(conn, name, pattern)?;
    Ok(Reply::Ok)
}

pub(super) fn delete(broker: &mut Broker, _: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.name()?;
    body.finish()?;

    broker.delete_channel(name)?;
    Ok(Reply::Ok)
}
