//! Closed projections over `Member` rows.

use crate::model::member::{Member, MemberId};
use crate::query::error::QueryResult;
use crate::query::row::{FromRow, Projection, RowRef};
use serde::{Deserialize, Serialize};

/// Member with its team name, built by constructor-expression queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberDto {
    pub id: MemberId,
    pub username: String,
    pub team_name: Option<String>,
}

impl MemberDto {
    /// Builds the view from an entity whose team snapshot is loaded.
    pub fn from_member(member: &Member) -> Self {
        Self {
            id: member.id,
            username: member.username.clone(),
            team_name: member.team.as_ref().map(|team| team.name.clone()),
        }
    }
}

impl From<&Member> for MemberDto {
    fn from(member: &Member) -> Self {
        Self::from_member(member)
    }
}

impl FromRow for MemberDto {
    fn from_row(row: RowRef<'_>) -> QueryResult<Self> {
        Ok(Self {
            id: row.uuid("id")?,
            username: row.text("username")?,
            team_name: row.opt_text("teamName")?,
        })
    }
}

impl Projection for MemberDto {
    const NAME: &'static str = "MemberDto";
    const FIELDS: &'static [&'static str] = &["id", "username", "teamName"];
}

/// Read-only view returned by native projection queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberProjection {
    pub id: MemberId,
    pub username: String,
    pub team_name: Option<String>,
}

impl FromRow for MemberProjection {
    fn from_row(row: RowRef<'_>) -> QueryResult<Self> {
        Ok(Self {
            id: row.uuid("id")?,
            username: row.text("username")?,
            team_name: row.opt_text("teamName")?,
        })
    }
}

impl Projection for MemberProjection {
    const NAME: &'static str = "MemberProjection";
    const FIELDS: &'static [&'static str] = &["id", "username", "teamName"];
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameOnly {
    pub username: String,
}

impl FromRow for UsernameOnly {
    fn from_row(row: RowRef<'_>) -> QueryResult<Self> {
        Ok(Self {
            username: row.text("username")?,
        })
    }
}

impl Projection for UsernameOnly {
    const NAME: &'static str = "UsernameOnly";
    const FIELDS: &'static [&'static str] = &["username"];
}
