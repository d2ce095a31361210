use super::{HandlerResult, Reply};
use crate::broker::{Broker, ConnectionId, Object};
use crate::protocol::{BodyReader, BodyWriter};
use crate::utils::error::BrokerError;
use crate::utils::validate::{NAME_FIELD, TOPIC_FIELD};

pub(super) fn create(broker: &mut Broker, _: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.name()?;
    let flags = body.u32()?;
    body.finish()?;

    broker.create_route(name, flags)?;
    Ok(Reply::Ok)
}

pub(super) fn exist(broker: &mut Broker, _: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.name()?;
    body.finish()?;

    let mut out = BodyWriter::with_capacity(1);
    out.u8(broker.route_id(name).is_some() as u8);
    Ok(Reply::Data(out.finish()))
}

/// name[64], flags, key count.
pub(super) fn list(broker: &mut Broker, _: ConnectionId, body: BodyReader<'_>) -> HandlerResult {
    body.finish()?;

    let mut out = BodyWriter::new();
    for route in broker.routes() {
        out.fixed(route.name(), NAME_FIELD)
            .u32(route.flags())
            .u32(u32::try_from(route.key_count()).unwrap_or(u32::MAX));
    }
    Ok(Reply::Data(out.finish()))
}

/// One key[32] + queue name[64] record per binding.
pub(super) fn keys(broker: &mut Broker, _: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.name()?;
    body.finish()?;

    let route = broker.route_by_name(name).ok_or(BrokerError::NotFound)?;
    let mut out = BodyWriter::new();
    for (key, qid) in route.bindings() {
        if let Some(queue) = broker.queue(qid) {
            out.fixed(key, TOPIC_FIELD).fixed(queue.name(), NAME_FIELD);
        }
    }
    Ok(Reply::Data(out.finish()))
}

pub(super) fn rename(broker: &mut Broker, _: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let from = body.name()?;
    let to = body.name()?;
    body.finish()?;

    broker.rename_route(from, to)?;
    Ok(Reply::Ok)
}

pub(super) fn bind(broker: &mut Broker, _: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let route = body.name()?;
    let queue = body.name()?;
    let key = body.topic()?;
    body.finish()?;

    broker.bind(route, queue, key)?;
    Ok(Reply::Ok)
}

pub(super) fn unbind(broker: &mut Broker, _: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let route = body.name()?;
    let queue = body.name()?;
    let key = body.topic()?;
    body.finish()?;

    broker.unbind(route, queue, key)?;
    Ok(Reply::Ok)
}

pub(super) fn push(broker: &mut Broker, _: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.name()?;
    let key = body.topic()?;
    let expire_ms = body.u32()?;
    let payload = Object::copy_from_slice(body.payload()?);

    broker.push_route(name, key, payload, expire_ms)?;
    Ok(Reply::Ok)
}

pub(super) fn delete(broker: &mut Broker, _: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.name()?;
    body.finish()?;

    broker.delete_route(name)?;
    Ok(Reply::Ok)
}
