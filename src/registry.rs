use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{RegisterStudentReq, Student};
use crate::store::Store;

/// Student ids look like "2023-123456": literal "20", two digits, a dash,
/// six digits.
pub fn is_valid_student_id(id: &str) -> bool {
    let b = id.as_bytes();
    b.len() == 11
        && b[0] == b'2'
        && b[1] == b'0'
        && b[2].is_ascii_digit()
        && b[3].is_ascii_digit()
        && b[4] == b'-'
        && b[5..].iter().all(u8::is_ascii_digit)
}

/// Block/section with all whitespace stripped and uppercased, e.g.
/// " stem 241 " -> "STEM241".
pub fn normalize_block(block: &str) -> String {
    block
        .split_whitespace()
        .collect::<String>()
        .to_uppercase()
}

pub async fn register(store: &dyn Store, req: RegisterStudentReq) -> Result<Student> {
    if !is_valid_student_id(&req.student_id) {
        return Err(Error::InvalidFormat(req.student_id));
    }
    let rfid = req.rfid.trim().to_owned();
    if rfid.is_empty() {
        return Err(Error::MissingParameter("rfid"));
    }

    let student = Student {
        id: Uuid::new_v4(),
        student_id: req.student_id,
        rfid,
        first_name: req.first_name.trim().to_owned(),
        last_name: req.last_name.trim().to_owned(),
        pe_course: req.pe_course,
        block_section: normalize_block(&req.block_section),
        registered_at: Utc::now(),
        is_active: true,
    };
    store.insert_student(&student).await?;
    tracing::info!(student_id = %student.student_id, block = %student.block_section, "student registered");
    Ok(student)
}

/// Resolve an identifier (student id or rfid) to an active student.
pub async fn lookup(store: &dyn Store, identifier: &str) -> Result<Student> {
    store
        .find_student(identifier)
        .await?
        .ok_or_else(|| Error::UnknownIdentity(identifier.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_ids() {
        assert!(is_valid_student_id("2023-123456"));
        assert!(is_valid_student_id("2099-000001"));
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(!is_valid_student_id("1999-123456")); // wrong century
        assert!(!is_valid_student_id("2023-12345")); // five digits
        assert!(!is_valid_student_id("2023-1234567"));
        assert!(!is_valid_student_id("2023123456"));
        assert!(!is_valid_student_id("20a3-123456"));
        assert!(!is_valid_student_id(""));
    }

    #[test]
    fn block_is_stripped_and_uppercased() {
        assert_eq!(normalize_block(" stem 241 "), "STEM241");
        assert_eq!(normalize_block("CS231"), "CS231");
        assert_eq!(normalize_block("c s\t2 3 1"), "CS231");
    }
}
