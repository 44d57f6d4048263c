//! Discord permission resolution for voice channels.
//!
//! Base permissions come from @everyone plus the member's roles, then channel
//! overwrites are applied in order: @everyone, roles, member.

pub const ADMINISTRATOR: u64 = 1 << 3;
pub const VIEW_CHANNEL: u64 = 1 << 10;
pub const CONNECT: u64 = 1 << 20;
pub const SPEAK: u64 = 1 << 21;

pub const ALL: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwriteKind {
    Role,
    Member,
}

impl OverwriteKind {
    pub fn from_discord(value: u64) -> Self {
        if value == 1 {
            OverwriteKind::Member
        } else {
            OverwriteKind::Role
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overwrite {
    pub id: String,
    pub kind: OverwriteKind,
    pub allow: u64,
    pub deny: u64,
}

/// What we know about one member of a guild.
#[derive(Debug, Clone)]
pub struct MemberPermissions<'a> {
    pub guild_id: &'a str,
    pub member_id: &'a str,
    pub owner_id: Option<&'a str>,
    /// Permissions of the @everyone role (whose id is the guild id).
    pub everyone: u64,
    /// `(role id, permissions)` for each role the member has.
    pub roles: &'a [(String, u64)],
}

impl MemberPermissions<'_> {
    pub fn base(&self) -> u64 {
        if self.owner_id == Some(self.member_id) {
            return ALL;
        }
        let perms = self
            .roles
            .iter()
            .fold(self.everyone, |acc, (_, p)| acc | p);
        if perms & ADMINISTRATOR != 0 { ALL } else { perms }
    }

    /// Effective permissions in a channel with the given overwrites.
    pub fn in_channel(&self, overwrites: &[Overwrite]) -> u64 {
        let mut perms = self.base();
        if perms & ADMINISTRATOR != 0 {
            return ALL;
        }

        if let Some(everyone) = overwrites
            .iter()
            .find(|o| o.kind == OverwriteKind::Role && o.id == self.guild_id)
        {
            perms &= !everyone.deny;
            perms |= everyone.allow;
        }

        let (allow, deny) = overwrites
            .iter()
            .filter(|o| o.kind == OverwriteKind::Role && o.id != self.guild_id)
            .filter(|o| self.roles.iter().any(|(id, _)| *id == o.id))
            .fold((0, 0), |(a, d), o| (a | o.allow, d | o.deny));
        perms &= !deny;
        perms |= allow;

        if let Some(member) = overwrites
            .iter()
            .find(|o| o.kind == OverwriteKind::Member && o.id == self.member_id)
        {
            perms &= !member.deny;
            perms |= member.allow;
        }
        perms
    }
}

/// Whether `perms` lets a member join a voice channel.
pub fn can_connect(perms: u64) -> bool {
    perms & ADMINISTRATOR != 0 || (perms & VIEW_CHANNEL != 0 && perms & CONNECT != 0)
}

pub fn can_speak(perms: u64) -> bool {
    perms & ADMINISTRATOR != 0 || perms & SPEAK != 0
}
