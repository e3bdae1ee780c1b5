//! Member entity.
//!
//! # Invariants
//! - `team_id` is the source of truth for membership.
//! - `team` is a loaded snapshot, present only when a query fetched it.

use crate::model::team::{Team, TeamId};
use crate::model::{uuid_value, Entity};
use crate::query::error::QueryResult;
use crate::query::row::{FromRow, RowRef};
use crate::schema::{EntitySchema, Property};
use once_cell::sync::Lazy;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type MemberId = Uuid;

static MEMBER_SCHEMA: Lazy<EntitySchema> = Lazy::new(|| {
    EntitySchema::new("Member", "member")
        .with(Property::id("id", "member_id"))
        .with(Property::text("username", "username"))
        .with(Property::integer("age", "age"))
        .with(Property::reference("team", "team_id", "Team"))
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub username: String,
    pub age: i64,
    pub team_id: Option<TeamId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<Team>,
}

impl Member {
    pub fn new(username: impl Into<String>) -> Self {
        Self::with_age(username, 0)
    }

    pub fn with_age(username: impl Into<String>, age: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            age,
            team_id: None,
            team: None,
        }
    }

    pub fn with_team(username: impl Into<String>, age: i64, team: &Team) -> Self {
        let mut member = Self::with_age(username, age);
        member.change_team(team);
        member
    }

    /// Moves the member; the loaded team snapshot no longer applies.
    pub fn change_team(&mut self, team: &Team) {
        self.team_id = Some(team.id);
        self.team = None;
    }
}

impl FromRow for Member {
    fn from_row(row: RowRef<'_>) -> QueryResult<Self> {
        let team_row = row.scope("team");
        let team = if team_row.is_null("id") {
            None
        } else {
            Some(Team::from_row(team_row)?)
        };
        Ok(Self {
            id: row.uuid("id")?,
            username: row.text("username")?,
            age: row.integer("age")?,
            team_id: row.opt_uuid("team")?,
            team,
        })
    }
}

impl Entity for Member {
    fn schema() -> &'static EntitySchema {
        &MEMBER_SCHEMA
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn column_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("member_id", uuid_value(self.id)),
            ("username", Value::Text(self.username.clone())),
            ("age", Value::Integer(self.age)),
            ("team_id", self.team_id.map_or(Value::Null, uuid_value)),
        ]
    }
}
