//! Member use-case service.
//!
//! # Invariants
//! - Listing returns `MemberDto` views, never entities.

use crate::model::dto::MemberDto;
use crate::model::member::MemberId;
use crate::query::error::QueryResult;
use crate::query::page::{Page, PageRequest};
use crate::repo::member_repo::MemberRepository;
use crate::session::PersistenceSession;

pub struct MemberService<'a, S: PersistenceSession> {
    repo: MemberRepository<'a, S>,
}

impl<'a, S: PersistenceSession> MemberService<'a, S> {
    pub fn new(repo: MemberRepository<'a, S>) -> Self {
        Self { repo }
    }

    /// One page of members with their team names.
    pub fn list_members(&self, page: &PageRequest) -> QueryResult<Page<MemberDto>> {
        let members = self.repo.find_all_paged(page)?;
        Ok(members.map(|member| MemberDto::from_member(&member)))
    }

    pub fn member_username(&self, id: MemberId) -> QueryResult<Option<String>> {
        Ok(self.repo.find_by_id(id)?.map(|member| member.username))
    }
}
