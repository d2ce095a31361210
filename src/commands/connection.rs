use tracing::info;

use super::{HandlerResult, Reply};
use crate::broker::{Broker, ConnectionId};
use crate::protocol::{BodyReader, BodyWriter};

fn version_part(raw: &str) -> u16 {
    raw.parse().unwrap_or(0)
}

pub(super) fn auth(broker: &mut Broker, conn: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.user_name()?;
    let password = body.password()?;
    body.finish()?;

    broker.authenticate(conn, name, password)?;
    Ok(Reply::Ok)
}

pub(super) fn ping(_: &mut Broker, _: ConnectionId, body: BodyReader<'_>) -> HandlerResult {
    body.finish()?;
    Ok(Reply::Ok)
}

/// Version, uptime, memory and registry sizes.
pub(super) fn stat(broker: &mut Broker, _: ConnectionId, body: BodyReader<'_>) -> HandlerResult {
    body.finish()?;

    let stats = broker.stats();
    let count = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);

    let mut out = BodyWriter::with_capacity(42);
    out.u16(version_part(env!("CARGO_PKG_VERSION_MAJOR")))
        .u16(version_part(env!("CARGO_PKG_VERSION_MINOR")))
        .u16(version_part(env!("CARGO_PKG_VERSION_PATCH")))
        .u64(stats.uptime_secs)
        .u64(stats.used_memory)
        .u32(count(stats.clients))
        .u32(count(stats.users))
        .u32(count(stats.queues))
        .u32(count(stats.routes))
        .u32(count(stats.channels));
    Ok(Reply::Data(out.finish()))
}

pub(super) fn save(broker: &mut Broker, conn: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let background = body.u8()? != 0;
    body.finish()?;

    info!("{conn} requested a {} save", if background { "background" } else { "blocking" });
    broker.save(background)?;
    Ok(Reply::Ok)
}

pub(super) fn flush(broker: &mut Broker, conn: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let what = body.u32()?;
    body.finish()?;

    info!("{conn} requested flush {what:#x}");
    broker.flush(what);
    Ok(Reply::Ok)
}

pub(super) fn disconnect(_: &mut Broker, _: ConnectionId, body: BodyReader<'_>) -> HandlerResult {
    body.finish()?;
    Ok(Reply::Close)
}
