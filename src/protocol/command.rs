use crate::broker::user::Permissions;

/// Permission needed to run a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Allowed before authentication.
    Open,
    /// Needs the admin bit.
    Admin,
    /// Needs the admin bit, the category bit or the operation bit.
    Operation { category: u64, op: u64 },
}

impl Access {
    pub fn allows(self, perm: Permissions) -> bool {
        match self {
            Access::Open => true,
            Access::Admin => perm.is_admin(),
            Access::Operation { category, op } => perm.allows(category, op),
        }
    }
}

macro_rules! commands {
    ($($variant:ident = $opcode:literal),+ $(,)?) => {
        /// Every request opcode understood by the broker.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Command {
            $($variant = $opcode),+
        }

        impl TryFrom<u8> for Command {
            type Error = u8;

            fn try_from(opcode: u8) -> Result<Self, u8> {
                match opcode {
                    $($opcode => Ok(Command::$variant),)+
                    other => Err(other),
                }
            }
        }
    };
}

commands! {
    Auth = 0x01,
    Ping = 0x02,
    Stat = 0x03,
    Save = 0x04,
    Flush = 0x05,
    Disconnect = 0x06,

    UserCreate = 0x07,
    UserList = 0x08,
    UserRename = 0x09,
    UserSetPerm = 0x0A,
    UserDelete = 0x0B,

    QueueCreate = 0x0C,
    QueueDeclare = 0x0D,
    QueueExist = 0x0E,
    QueueList = 0x0F,
    QueueRename = 0x10,
    QueueSize = 0x11,
    QueuePush = 0x12,
    QueueGet = 0x13,
    QueuePop = 0x14,
    QueueConfirm = 0x15,
    QueueSubscribe = 0x16,
    QueueUnsubscribe = 0x17,
    QueuePurge = 0x18,
    QueueDelete = 0x19,

    RouteCreate = 0x1A,
    RouteExist = 0x1B,
    RouteList = 0x1C,
    RouteKeys = 0x1D,
    RouteRename = 0x1E,
    RouteBind = 0x1F,
    RouteUnbind = 0x20,
    RoutePush = 0x21,
    RouteDelete = 0x22,

    ChannelCreate = 0x23,
    ChannelExist = 0x24,
    ChannelList = 0x25,
    ChannelRename = 0x26,
    ChannelPublish = 0x27,
    ChannelSubscribe = 0x28,
    ChannelPsubscribe = 0x29,
    ChannelUnsubscribe = 0x2A,
    ChannelPunsubscribe = 0x2B,
    ChannelDelete = 0x2C,
}

/// Per-operation permission bits start here, in opcode order from
/// `QueueCreate` onwards.
const FIRST_OPERATION_BIT: u32 = 20;

impl Command {
    pub fn opcode(self) -> u8 {
        self as u8
    }

    /// Bit of the per-operation permission for queue, route and channel
    /// commands.
    pub fn operation_bit(self) -> Option<u64> {
        let opcode = self as u8;
        let first = Command::QueueCreate as u8;
        if opcode < first {
            return None;
        }
        Some(Permissions::op(FIRST_OPERATION_BIT + u32::from(opcode - first)))
    }

    pub fn access(self) -> Access {
        use Command::*;

        let category = match self {
            Auth | Ping | Disconnect => return Access::Open,
            Stat | Save | Flush | UserCreate | UserList | UserRename | UserSetPerm | UserDelete => {
                return Access::Admin;
            }
            QueueCreate | QueueDeclare | QueueExist | QueueList | QueueRename | QueueSize
            | QueuePush | QueueGet | QueuePop | QueueConfirm | QueueSubscribe
            | QueueUnsubscribe | QueuePurge | QueueDelete => Permissions::QUEUE,
            RouteCreate | RouteExist | RouteList | RouteKeys | RouteRename | RouteBind
            | RouteUnbind | RoutePush | RouteDelete => Permissions::ROUTE,
            ChannelCreate | ChannelExist | ChannelList | ChannelRename | ChannelPublish
            | ChannelSubscribe | ChannelPsubscribe | ChannelUnsubscribe | ChannelPunsubscribe
            | ChannelDelete => Permissions::CHANNEL,
        };

        Access::Operation {
            category,
            op: self.operation_bit().unwrap_or(0),
        }
    }
}
