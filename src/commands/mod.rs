//! Request dispatch.
//!
//! [`dispatch`] takes one framed request, checks the sender's permissions
//! for the opcode, runs the matching handler against the broker and queues
//! the reply on the connection. Handlers parse their body with
//! [`BodyReader`] and return a [`Reply`] or a [`BrokerError`]; errors never
//! leave this module except as a status packet.

mod channel;
mod connection;
mod queue;
mod route;
mod user;

use bytes::Bytes;
use tracing::debug;

use crate::broker::{Broker, ConnectionId, Object};
use crate::protocol::{BodyReader, Command, Frame, Status, response};
use crate::utils::error::BrokerError;

/// What a handler wants sent back.
#[derive(Debug)]
pub enum Reply {
    /// Bare success status.
    Ok,
    /// Success with an inline body.
    Data(Bytes),
    /// Success whose body is `prefix` followed by a shared payload.
    Payload { prefix: Bytes, payload: Object },
    /// No reply; the connection is to be closed.
    Close,
}

pub type HandlerResult = Result<Reply, BrokerError>;

/// Whether the transport should keep the connection after a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

type Handler = fn(&mut Broker, ConnectionId, BodyReader<'_>) -> HandlerResult;

fn handler(command: Command) -> Handler {
    use Command::*;

    match command {
        Auth => connection::auth,
        Ping => connection::ping,
        Stat => connection::stat,
        Save => connection::save,
        Flush => connection::flush,
        Disconnect => connection::disconnect,

        UserCreate => user::create,
        UserList => user::list,
        UserRename => user::rename,
        UserSetPerm => user::set_permissions,
        UserDelete => user::delete,

        QueueCreate => queue::create,
        QueueDeclare => queue::declare,
        QueueExist => queue::exist,
        QueueList => queue::list,
        QueueRename => queue::rename,
        QueueSize => queue::size,
        QueuePush => queue::push,
        QueueGet => queue::get,
        QueuePop => queue::pop,
        QueueConfirm => queue::confirm,
        QueueSubscribe => queue::subscribe,
        QueueUnsubscribe => queue::unsubscribe,
        QueuePurge => queue::purge,
        QueueDelete => queue::delete,

        RouteCreate => route::create,
        RouteExist => route::exist,
        RouteList => route::list,
        RouteKeys => route::keys,
        RouteRename => route::rename,
        RouteBind => route::bind,
        RouteUnbind => route::unbind,
        RoutePush => route::push,
        RouteDelete => route::delete,

        ChannelCreate => channel::create,
        ChannelExist => channel::exist,
        ChannelList => channel::list,
        ChannelRename => channel::rename,
        ChannelPublish => channel::publish,
        ChannelSubscribe => channel::subscribe,
        ChannelPsubscribe => channel::psubscribe,
        ChannelUnsubscribe => channel::unsubscribe,
        ChannelPunsubscribe => channel::punsubscribe,
        ChannelDelete => channel::delete,
    }
}

/// Runs one request for `conn` and queues its reply.
pub fn dispatch(broker: &mut Broker, conn: ConnectionId, frame: Frame) -> Flow {
    let opcode = frame.opcode;
    let result = match Command::try_from(opcode) {
        Ok(command) => run(broker, conn, command, &frame.body),
        Err(unknown) => Err(BrokerError::UnknownCommand(unknown)),
    };

    let reply = match result {
        Ok(reply) => reply,
        Err(err) => {
            debug!("{conn} request {opcode:#04x} failed: {err}");
            if !frame.noack {
                broker.send_to(conn, response::status(opcode, err.status()));
            }
            return Flow::Continue;
        }
    };

    match reply {
        Reply::Ok => {
            if !frame.noack {
                broker.send_to(conn, response::status(opcode, Status::Success));
            }
        }
        Reply::Data(body) => broker.send_to(conn, response::data(opcode, &body)),
        Reply::Payload { prefix, payload } => {
            broker.send_to(conn, response::payload_head(opcode, &prefix, &payload));
            broker.send_to(conn, payload);
        }
        Reply::Close => return Flow::Close,
    }
    Flow::Continue
}

fn run(broker: &mut Broker, conn: ConnectionId, command: Command, body: &[u8]) -> HandlerResult {
    let perm = broker.permissions(conn).ok_or(BrokerError::NotFound)?;
    if !command.access().allows(perm) {
        return Err(BrokerError::AccessDenied);
    }
    handler(command)(broker, conn, BodyReader::new(body))
}
