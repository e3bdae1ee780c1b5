//! Team entity and its inverse member collection.

use crate::model::member::Member;
use crate::model::{uuid_value, Entity};
use crate::query::error::QueryResult;
use crate::query::row::{FromRow, RowRef};
use crate::schema::{EntitySchema, Property};
use once_cell::sync::Lazy;
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TeamId = Uuid;

static TEAM_SCHEMA: Lazy<EntitySchema> = Lazy::new(|| {
    EntitySchema::new("Team", "team")
        .with(Property::id("id", "team_id"))
        .with(Property::text("name", "name"))
        .with(Property::collection("members", "Member", "team"))
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: TeamId,
    pub name: String,
    /// Filled only by queries fetching `members`.
    #[serde(default)]
    pub members: Vec<Member>,
}

impl Team {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            members: Vec::new(),
        }
    }
}

impl FromRow for Team {
    fn from_row(row: RowRef<'_>) -> QueryResult<Self> {
        let mut team = Self {
            id: row.uuid("id")?,
            name: row.text("name")?,
            members: Vec::new(),
        };
        team.absorb(row)?;
        Ok(team)
    }

    /// Collects the fetched member of each repeated owner row once.
    fn absorb(&mut self, row: RowRef<'_>) -> QueryResult<()> {
        let member_row = row.scope("members");
        if member_row.is_null("id") {
            return Ok(());
        }
        let member = Member::from_row(member_row)?;
        if !self.members.iter().any(|known| known.id == member.id) {
            self.members.push(member);
        }
        Ok(())
    }
}

impl Entity for Team {
    fn schema() -> &'static EntitySchema {
        &TEAM_SCHEMA
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn column_values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("team_id", uuid_value(self.id)),
            ("name", Value::Text(self.name.clone())),
        ]
    }
}
