//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `repoquery_core` linkage (`ping`, `version`).
//! - With `demo`, run a derived query and one page against an in-memory
//!   store and print deterministic summaries.

use repoquery_core::{
    default_registry, open_db_in_memory, Member, MemberRepository, MemberService, PageRequest,
    SqliteSession, Team, TeamRepository,
};
use std::error::Error;

fn main() {
    println!("repoquery_core ping={}", repoquery_core::ping());
    println!("repoquery_core version={}", repoquery_core::core_version());

    if std::env::args().nth(1).as_deref() == Some("demo") {
        if let Err(err) = demo() {
            eprintln!("demo failed: {err}");
            std::process::exit(1);
        }
    }
}

fn demo() -> Result<(), Box<dyn Error>> {
    let conn = open_db_in_memory()?;
    let registry = default_registry()?;
    let session = SqliteSession::new(&conn);
    let teams = TeamRepository::new(&registry, &session);
    let members = MemberRepository::new(&registry, &session);

    let team = Team::new("teamA");
    teams.save(&team)?;
    for (index, age) in [10, 19, 20, 21, 40].into_iter().enumerate() {
        members.save(&Member::with_team(format!("member{}", index + 1), age, &team))?;
    }

    let adults = members.find_by_username_and_age_greater_than("member4", 20)?;
    println!("findByUsernameAndAgeGreaterThan matches={}", adults.len());

    let service = MemberService::new(MemberRepository::new(&registry, &session));
    let page = service.list_members(&PageRequest::of(0, 3)?)?;
    println!(
        "listMembers number={} size={} total_elements={} total_pages={} has_next={}",
        page.number(),
        page.size(),
        page.total_elements(),
        page.total_pages(),
        page.has_next()
    );
    for dto in page.content() {
        println!(
            "  {} team={}",
            dto.username,
            dto.team_name.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
