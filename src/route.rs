//! Route shapes and bucket identities.
//!
//! Every endpoint of the guild family maps to exactly one [`Route`]. A route is a
//! *shape*, not a URL: `PATCH /guilds/1/members/2` and `DELETE /guilds/1/members/3`
//! are both [`Route::GuildsSidMembersUid`]. Routes scoped by a major parameter are
//! rate limited per resource instance, so their bucket identity is the pair
//! `(route, major id)`.

use std::fmt;

use http::Method;

use crate::error::RestError;

/// Resource id that scopes a bucket (a guild id for every route here).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MajorId(pub u64);

impl From<u64> for MajorId {
    fn from(id: u64) -> Self {
        MajorId(id)
    }
}

impl fmt::Display for MajorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! routes {
    ($( $(#[$doc:meta])* $variant:ident => $key:literal, major: $major:literal; )+) => {
        /// Closed set of bucket keys.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Route {
            $( $(#[$doc])* $variant, )+
        }

        impl Route {
            /// Every known route, in declaration order.
            pub const ALL: &'static [Route] = &[$(Route::$variant),+];

            /// Symbolic bucket key as used in logs, e.g. `guilds_sid_members_uid`.
            pub const fn key(self) -> &'static str {
                match self {
                    $( Route::$variant => $key, )+
                }
            }

            /// Whether requests on this route must carry a major-parameter id.
            pub const fn requires_major(self) -> bool {
                match self {
                    $( Route::$variant => $major, )+
                }
            }
        }
    };
}

routes! {
    /// `/guilds`
    Guilds => "guilds", major: false;
    /// `/guilds/{sid}`
    GuildsSid => "guilds_sid", major: true;
    GuildsSidAuditLogs => "guilds_sid_auditlogs", major: true;
    GuildsSidBans => "guilds_sid_bans", major: true;
    GuildsSidBansUid => "guilds_sid_bans_uid", major: true;
    GuildsSidBulkBans => "guilds_sid_bulk_bans", major: true;
    GuildsSidChannels => "guilds_sid_channels", major: true;
    /// Widget settings (`/guilds/{sid}/widget`).
    GuildsSidEmbed => "guilds_sid_embed", major: true;
    GuildsSidEmojis => "guilds_sid_emojis", major: true;
    GuildsSidEmojisEid => "guilds_sid_emojis_eid", major: true;
    GuildsSidIntegrations => "guilds_sid_integrations", major: true;
    GuildsSidIntegrationsIid => "guilds_sid_integrations_iid", major: true;
    GuildsSidIntegrationsIidSync => "guilds_sid_integrations_iid_sync", major: true;
    GuildsSidInvites => "guilds_sid_invites", major: true;
    /// Member listing and member search.
    GuildsSidMembers => "guilds_sid_members", major: true;
    GuildsSidMembersMe => "guilds_sid_members_me", major: true;
    GuildsSidMembersUid => "guilds_sid_members_uid", major: true;
    GuildsSidMembersUidRolesRid => "guilds_sid_members_uid_roles_rid", major: true;
    GuildsSidPrune => "guilds_sid_prune", major: true;
    GuildsSidRegions => "guilds_sid_regions", major: true;
    GuildsSidRoles => "guilds_sid_roles", major: true;
    GuildsSidRolesRid => "guilds_sid_roles_rid", major: true;
    GuildsSidWebhooks => "guilds_sid_webhooks", major: true;
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Identity of a rate-limit bucket. Two identities are equal only if both the
/// route and the major id are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketId {
    pub route: Route,
    pub major: Option<MajorId>,
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.major {
            Some(major) => write!(f, "{}:{}", self.route, major),
            None => write!(f, "{}", self.route),
        }
    }
}

/// Resolve a bucket identity. Pure; the identity is the pair itself.
pub fn resolve(route: Route, major: Option<MajorId>) -> BucketId {
    BucketId { route, major }
}

/// Immutable description of one call: which bucket it draws from, the verb, and
/// the fully resolved URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDescriptor {
    route: Route,
    major: Option<MajorId>,
    method: Method,
    url: String,
}

impl RouteDescriptor {
    /// Build a descriptor, rejecting a major id that does not match what the
    /// route requires.
    pub fn new(
        route: Route,
        major: Option<MajorId>,
        method: Method,
        url: impl Into<String>,
    ) -> Result<Self, RestError> {
        match (route.requires_major(), major) {
            (true, None) => Err(RestError::InvalidRoute {
                route,
                reason: "route is scoped by a major parameter but none was given",
            }),
            (false, Some(_)) => Err(RestError::InvalidRoute {
                route,
                reason: "route has no major parameter but one was given",
            }),
            _ => Ok(Self { route, major, method, url: url.into() }),
        }
    }

    /// Descriptor for a route scoped by a major parameter.
    pub fn scoped(
        route: Route,
        major: impl Into<MajorId>,
        method: Method,
        url: impl Into<String>,
    ) -> Result<Self, RestError> {
        Self::new(route, Some(major.into()), method, url)
    }

    /// Descriptor for a route without a major parameter.
    pub fn unscoped(route: Route, method: Method, url: impl Into<String>) -> Result<Self, RestError> {
        Self::new(route, None, method, url)
    }

    pub fn route(&self) -> Route {
        self.route
    }

    pub fn major(&self) -> Option<MajorId> {
        self.major
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Bucket this call draws its budget from.
    pub fn bucket_id(&self) -> BucketId {
        resolve(self.route, self.major)
    }
}
