//! Users and permission bits.
//!
//! A permission set combines coarse category bits (queue, route, channel,
//! admin) with one bit per operation. An operation is allowed when the
//! admin bit, its category bit or its own bit is set.

use crate::utils::error::BrokerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Permissions(pub u64);

impl Permissions {
    pub const NONE: Permissions = Permissions(0);

    pub const QUEUE: u64 = 1 << 0;
    pub const ROUTE: u64 = 1 << 1;
    pub const CHANNEL: u64 = 1 << 2;
    pub const ADMIN: u64 = 1 << 5;
    /// Protects the user from rename, permission change and deletion.
    pub const IMMUTABLE: u64 = 1 << 6;

    /// Every category bit plus admin.
    pub const ALL: u64 = 0x3F;
    pub const SUPER: Permissions = Permissions(Self::ALL | Self::IMMUTABLE);

    pub const fn op(bit: u32) -> u64 {
        1 << bit
    }

    pub fn allows(self, category: u64, op: u64) -> bool {
        self.0 & (Self::ADMIN | category | op) != 0
    }

    pub fn is_admin(self) -> bool {
        self.0 & Self::ADMIN != 0
    }

    pub fn is_immutable(self) -> bool {
        self.0 & Self::IMMUTABLE != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
    pub password: String,
    pub perm: Permissions,
}

impl User {
    pub fn new(name: &str, password: &str, perm: Permissions) -> Self {
        Self {
            name: name.to_string(),
            password: password.to_string(),
            perm,
        }
    }
}

/// Credential storage consumed by the broker.
pub trait UserStore: Send + std::fmt::Debug {
    /// Looks a user up by name, also matching the password when given.
    fn find(&self, name: &str, password: Option<&str>) -> Option<&User>;
    fn insert(&mut self, user: User) -> Result<(), BrokerError>;
    fn rename(&mut self, from: &str, to: &str) -> Result<(), BrokerError>;
    fn set_permissions(&mut self, name: &str, perm: Permissions) -> Result<(), BrokerError>;
    fn delete(&mut self, name: &str) -> Result<User, BrokerError>;
    fn list(&self) -> Vec<&User>;
    /// Removes every user not marked immutable; returns how many went.
    fn clear_mutable(&mut self) -> usize;

    fn len(&self) -> usize {
        self.list().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The in-memory user list.
#[derive(Debug, Default)]
pub struct UserRegistry {
    users: Vec<User>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.users.iter().position(|u| u.name == name)
    }

    fn mutable_position(&self, name: &str) -> Result<usize, BrokerError> {
        let index = self.position(name).ok_or(BrokerError::NotFound)?;
        if self.users[index].perm.is_immutable() {
            return Err(BrokerError::Conflict("user is immutable"));
        }
        Ok(index)
    }
}

impl UserStore for UserRegistry {
    fn find(&self, name: &str, password: Option<&str>) -> Option<&User> {
        self.users
            .iter()
            .find(|u| u.name == name && password.is_none_or(|p| u.password == p))
    }

    fn insert(&mut self, user: User) -> Result<(), BrokerError> {
        if self.position(&user.name).is_some() {
            return Err(BrokerError::Conflict("user already exists"));
        }
        self.users.push(user);
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), BrokerError> {
        let index = self.mutable_position(from)?;
        if self.position(to).is_some() {
            return Err(BrokerError::BadValue);
        }
        self.users[index].name = to.to_string();
        Ok(())
    }

    fn set_permissions(&mut self, name: &str, perm: Permissions) -> Result<(), BrokerError> {
        let index = self.mutable_position(name)?;
        self.users[index].perm = perm;
        Ok(())
    }

    fn delete(&mut self, name: &str) -> Result<User, BrokerError> {
        let index = self.mutable_position(name)?;
        Ok(self.users.remove(index))
    }

    fn list(&self) -> Vec<&User> {
        self.users.iter().collect()
    }

    fn clear_mutable(&mut self) -> usize {
        let before = self.users.len();
        self.users.retain(|u| u.perm.is_immutable());
        before - self.users.len()
    }

    fn len(&self) -> usize {
        self.users.len()
    }
}
