//! # Policy
//!
//! Every access rule in one place. Handlers and services ask [`require`] and never
//! inspect roles themselves.
use uuid::Uuid;

use crate::{
    error::AppError,
    models::{BattleSession, Question, Role, User},
};

#[derive(Clone, Copy, Debug)]
pub enum Capability<'a> {
    Admin,
    TeacherOrAdmin,
    HostOf(&'a BattleSession),
    AuthorOf(&'a Question),
    SelfOrAdmin(Uuid),
    SelfOrStaff(Uuid),
    NotSelf(Uuid),
}

impl Capability<'_> {
    fn denial(&self) -> &'static str {
        match self {
            Capability::Admin => "Admin access required",
            Capability::TeacherOrAdmin => "Teacher or admin access required",
            Capability::HostOf(_) => "Only the host can manage this battle",
            Capability::AuthorOf(_) => "You can only modify your own questions",
            Capability::SelfOrAdmin(_) | Capability::SelfOrStaff(_) => "Access denied",
            Capability::NotSelf(_) => "You cannot perform this action on your own account",
        }
    }
}

pub fn allowed(caller: &User, capability: Capability) -> bool {
    let admin = caller.role == Role::Admin;

    match capability {
        Capability::Admin => admin,
        Capability::TeacherOrAdmin => caller.role.is_staff(),
        Capability::HostOf(battle) => battle.host_id == caller.id,
        Capability::AuthorOf(question) => admin || question.author_id == caller.id,
        Capability::SelfOrAdmin(id) => admin || caller.id == id,
        Capability::SelfOrStaff(id) => caller.role.is_staff() || caller.id == id,
        Capability::NotSelf(id) => caller.id != id,
    }
}

pub fn require(caller: &User, capability: Capability) -> Result<(), AppError> {
    if allowed(caller, capability) {
        Ok(())
    } else {
        Err(AppError::forbidden(capability.denial()))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::Difficulty;

    fn user(role: Role) -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: "someone@example.com".into(),
            name: "Someone".into(),
            role,
            experience: 0,
            level: 1,
            image_url: String::new(),
            password_hash: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn question_by(author_id: Uuid) -> Question {
        let now = Utc::now();
        Question {
            id: Uuid::new_v4(),
            text: "What is two plus two?".into(),
            answers: vec!["3".into(), "4".into()],
            correct_answer_index: 1,
            difficulty: Difficulty::Easy,
            category: "Math".into(),
            author_id,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_role_gates() {
        let student = user(Role::Student);
        let teacher = user(Role::Teacher);
        let admin = user(Role::Admin);

        assert!(!allowed(&student, Capability::TeacherOrAdmin));
        assert!(allowed(&teacher, Capability::TeacherOrAdmin));
        assert!(!allowed(&teacher, Capability::Admin));
        assert!(allowed(&admin, Capability::Admin));
    }

    #[test]
    fn test_authorship() {
        let author = user(Role::Teacher);
        let other = user(Role::Teacher);
        let admin = user(Role::Admin);
        let question = question_by(author.id);

        assert!(allowed(&author, Capability::AuthorOf(&question)));
        assert!(!allowed(&other, Capability::AuthorOf(&question)));
        assert!(allowed(&admin, Capability::AuthorOf(&question)));
    }

    #[test]
    fn test_self_rules() {
        let student = user(Role::Student);
        let teacher = user(Role::Teacher);
        let admin = user(Role::Admin);

        assert!(allowed(&student, Capability::SelfOrAdmin(student.id)));
        assert!(!allowed(&teacher, Capability::SelfOrAdmin(student.id)));
        assert!(allowed(&teacher, Capability::SelfOrStaff(student.id)));
        assert!(!allowed(&admin, Capability::NotSelf(admin.id)));

        let error = require(&student, Capability::SelfOrStaff(teacher.id)).unwrap_err();
        assert!(matches!(error, AppError::Forbidden(_)));
    }
}
