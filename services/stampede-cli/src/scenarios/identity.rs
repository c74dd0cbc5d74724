//! Seed members and the synthetic identities built from them

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Password every generated account signs up with.
pub const PASSWORD: &str = "Test1234!";

/// One member record from the seed source. Every field is optional; the
/// seed service is not under our control.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    #[serde(default)]
    pub id: Option<i64>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub phone: Option<String>,

    /// Birth date (6 digits) followed by one registration digit
    #[serde(default)]
    pub member_regist_num: Option<String>,

    #[serde(default)]
    pub account_number: Option<String>,

    #[serde(default)]
    pub account_password: Option<String>,
}

impl Member {
    /// Member carries bank-account credentials.
    pub fn has_account(&self) -> bool {
        non_empty(&self.account_number) && non_empty(&self.account_password)
    }

    /// Birth date and registration digit, when the registration number is
    /// exactly 7 characters.
    pub fn registration_parts(&self) -> Option<(String, String)> {
        let regist = self.member_regist_num.as_deref()?;
        let chars: Vec<char> = regist.chars().collect();
        if chars.len() != 7 {
            return None;
        }
        Some((chars[..6].iter().collect(), chars[6].to_string()))
    }

    /// Card holder fields: the first six characters and the seventh of any
    /// registration number at least 7 characters long, else `000000`/`1`.
    pub fn card_registration_parts(&self) -> (String, String) {
        let chars: Vec<char> = self.member_regist_num.as_deref().unwrap_or_default().chars().collect();
        if chars.len() < 7 {
            return ("000000".to_string(), "1".to_string());
        }
        (chars[..6].iter().collect(), chars[6].to_string())
    }
}

fn non_empty(value: &Option<String>) -> bool {
    value.as_deref().map(|v| !v.is_empty()).unwrap_or(false)
}

/// Account record served for card registration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(default)]
    pub account_number: Option<String>,

    #[serde(default)]
    pub account_password: Option<String>,
}

/// Signup fields for one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub birth_date: String,
    pub birth_back: String,
}

impl Identity {
    /// Identity from a member, with synthetic birth fields when the member has
    /// no usable registration number.
    pub fn from_member(member: &Member, email: String) -> Self {
        let (birth_date, birth_back) = member
            .registration_parts()
            .unwrap_or_else(synthetic_birth_fields);
        Self {
            email,
            name: member.name.clone(),
            phone: member.phone.clone(),
            birth_date,
            birth_back,
        }
    }

    pub fn with_phone(mut self, phone: Option<String>) -> Self {
        self.phone = phone;
        self
    }

    pub fn signup_payload(&self) -> Value {
        json!({
            "id": self.email,
            "password": PASSWORD,
            "name": self.name,
            "phone": self.phone,
            "birthDate": self.birth_date,
            "birthBack": self.birth_back,
        })
    }

    pub fn login_payload(&self) -> Value {
        json!({
            "id": self.email,
            "password": PASSWORD,
        })
    }
}

/// Random `9YMMDD` birth date and a registration digit in 1..=4.
pub fn synthetic_birth_fields() -> (String, String) {
    let mut rng = rand::thread_rng();
    let birth_date = format!(
        "9{}{:02}{:02}",
        rng.gen_range(0..10),
        rng.gen_range(1..=12),
        rng.gen_range(1..=28)
    );
    (birth_date, rng.gen_range(1..=4).to_string())
}

/// Digits of a phone number; `None` when nothing is left.
pub fn phone_digits(phone: Option<&str>) -> Option<String> {
    let digits: String = phone?.chars().filter(|c| c.is_ascii_digit()).collect();
    (!digits.is_empty()).then_some(digits)
}

/// Member slot for the workflow: spreads VUs 1000 slots apart.
pub fn workflow_member_index(vu_id: u32, iteration: u64, members: usize) -> usize {
    let unique = u64::from(vu_id.saturating_sub(1)) * 1000 + iteration;
    (unique % members as u64) as usize
}

/// Member slot for the signup and burst scenarios.
pub fn vu_member_index(vu_id: u32, members: usize) -> usize {
    vu_id as usize % members
}

/// `user{millis}_{random}_{namehash}@loadtest.com`
pub fn workflow_email(name: Option<&str>) -> String {
    let hash = name.map(name_hash).unwrap_or_else(|| "user".to_string());
    format!(
        "user{}_{}_{}@loadtest.com",
        Utc::now().timestamp_millis(),
        random_suffix(),
        hash
    )
}

/// `{name}_{millis}_{random}@loadtest.com`
pub fn signup_email(name: Option<&str>) -> String {
    format!(
        "{}_{}_{}@loadtest.com",
        name.unwrap_or("user"),
        Utc::now().timestamp_millis(),
        random_suffix()
    )
}

/// Short ASCII tag derived from a (possibly non-Latin) name.
pub fn name_hash(name: &str) -> String {
    let encoded: String = name.chars().map(|c| to_base36(u64::from(u32::from(c)))).collect();
    encoded.chars().take(5).collect()
}

fn random_suffix() -> String {
    to_base36(rand::thread_rng().gen_range(36u64.pow(4)..36u64.pow(6)))
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
