use serde::{Deserialize, Serialize};

use super::login::null_as_false;

/// An employee record as returned by `employees/`.
///
/// The logged-in user's profile is the employee whose id matches the
/// session's `user_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default, deserialize_with = "null_as_false")]
    pub is_staff: bool,
}

impl Employee {
    pub fn full_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.username.clone()
        } else {
            name.to_string()
        }
    }
}

/// Editable profile fields sent with `PUT employees/{id}/`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
}

impl From<&Employee> for ProfileUpdate {
    fn from(employee: &Employee) -> Self {
        Self {
            username: employee.username.clone(),
            first_name: employee.first_name.clone(),
            last_name: employee.last_name.clone(),
            email: employee.email.clone().unwrap_or_default(),
            phone_number: employee.phone_number.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name() {
        let employee = Employee {
            id: 1,
            username: "mrojas".to_string(),
            first_name: "Marta".to_string(),
            last_name: "Rojas".to_string(),
            ..Default::default()
        };
        assert_eq!(employee.full_name(), "Marta Rojas");

        let employee = Employee {
            id: 2,
            username: "tech2".to_string(),
            ..Default::default()
        };
        assert_eq!(employee.full_name(), "tech2");
    }

    #[test]
    fn test_parse_employee_with_nulls() {
        let json = r#"{"id":3,"username":"luis","first_name":"Luis","last_name":"Paz","email":null,"phone_number":null,"is_staff":false}"#;
        let employee: Employee = serde_json::from_str(json).unwrap();
        assert_eq!(employee.id, 3);
        assert_eq!(employee.email, None);
        assert!(!employee.is_staff);

        let update = ProfileUpdate::from(&employee);
        assert_eq!(update.email, "");
        assert_eq!(update.first_name, "Luis");

        let employee: Employee =
            serde_json::from_str(r#"{"id":4,"username":"ana","is_staff":null}"#).unwrap();
        assert!(!employee.is_staff);
    }
}
