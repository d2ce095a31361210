use tracing::info;

use super::{HandlerResult, Reply};
use crate::broker::user::{Permissions, User};
use crate::broker::{Broker, ConnectionId};
use crate::protocol::{BodyReader, BodyWriter};
use crate::utils::validate::USER_FIELD;

/// Only the bootstrap admin may be immutable.
fn requested(perm: u64) -> Permissions {
    Permissions(perm & !Permissions::IMMUTABLE)
}

pub(super) fn create(broker: &mut Broker, _: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.user_name()?;
    let password = body.password()?;
    let perm = body.u64()?;
    body.finish()?;

    broker
        .users_mut()
        .insert(User::new(name, password, requested(perm)))?;
    info!("user '{name}' created");
    Ok(Reply::Ok)
}

/// Every user as name[32], password[32], perm u64.
pub(super) fn list(broker: &mut Broker, _: ConnectionId, body: BodyReader<'_>) -> HandlerResult {
    body.finish()?;

    let users = broker.users().list();
    let mut out = BodyWriter::with_capacity(users.len() * (2 * USER_FIELD + 8));
    for user in users {
        out.fixed(&user.name, USER_FIELD)
            .fixed(&user.password, USER_FIELD)
            .u64(user.perm.0);
    }
    Ok(Reply::Data(out.finish()))
}

pub(super) fn rename(broker: &mut Broker, _: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let from = body.user_name()?;
    let to = body.user_name()?;
    body.finish()?;

    broker.users_mut().rename(from, to)?;
    Ok(Reply::Ok)
}

pub(super) fn set_permissions(
    broker: &mut Broker,
    _: ConnectionId,
    mut body: BodyReader<'_>,
) -> HandlerResult {
    let name = body.user_name()?;
    let perm = body.u64()?;
    body.finish()?;

    broker.users_mut().set_permissions(name, requested(perm))?;
    Ok(Reply::Ok)
}

pub(super) fn delete(broker: &mut Broker, _: ConnectionId, mut body: BodyReader<'_>) -> HandlerResult {
    let name = body.user_name()?;
    body.finish()?;

    broker.users_mut().delete(name)?;
    info!("user '{name}' deleted");
    Ok(Reply::Ok)
}
