//! External directory collaborators.
//!
//! The provider and patient directories deliver identity and schedule
//! records; this core consumes their contracts but does not reimplement
//! them. In-memory implementations ship for tests and embedding callers.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Weekday;
use uuid::Uuid;

use crate::error::DirectoryError;
use crate::model::{PatientDetails, ScheduleTemplate};

/// Provider identity and schedule-template lookup.
pub trait ProviderDirectory {
    /// The provider's working periods for one day of week. A closed day is
    /// an empty template, not an error.
    fn schedule_template(
        &self,
        provider_id: Uuid,
        weekday: Weekday,
    ) -> Result<ScheduleTemplate, DirectoryError>;

    /// Configured duration for an appointment type, in minutes.
    fn appointment_type_duration(&self, type_id: Uuid) -> Result<u32, DirectoryError>;
}

/// Patient resolution by contact identifier. The directory is external;
/// existing records are matched and updated in place.
pub trait PatientDirectory {
    fn find_or_create_patient(&self, details: &PatientDetails) -> Result<Uuid, DirectoryError>;
}

/// In-memory provider directory.
#[derive(Debug, Default)]
pub struct InMemoryProviderDirectory {
    templates: HashMap<(Uuid, Weekday), ScheduleTemplate>,
    durations: HashMap<Uuid, u32>,
    known_providers: Vec<Uuid>,
}

impl InMemoryProviderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_provider(&mut self, provider_id: Uuid) {
        if !self.known_providers.contains(&provider_id) {
            self.known_providers.push(provider_id);
        }
    }

    pub fn set_template(
        &mut self,
        provider_id: Uuid,
        weekday: Weekday,
        template: ScheduleTemplate,
    ) {
        self.add_provider(provider_id);
        self.templates.insert((provider_id, weekday), template);
    }

    pub fn set_appointment_type(&mut self, type_id: Uuid, duration_min: u32) {
        self.durations.insert(type_id, duration_min);
    }
}

impl ProviderDirectory for InMemoryProviderDirectory {
    fn schedule_template(
        &self,
        provider_id: Uuid,
        weekday: Weekday,
    ) -> Result<ScheduleTemplate, DirectoryError> {
        if !self.known_providers.contains(&provider_id) {
            return Err(DirectoryError::UnknownProvider(provider_id));
        }
        // A registered provider with no template for this weekday is closed.
        Ok(self
            .templates
            .get(&(provider_id, weekday))
            .cloned()
            .unwrap_or_else(ScheduleTemplate::closed))
    }

    fn appointment_type_duration(&self, type_id: Uuid) -> Result<u32, DirectoryError> {
        self.durations
            .get(&type_id)
            .copied()
            .ok_or(DirectoryError::UnknownAppointmentType(type_id))
    }
}

/// In-memory patient directory keyed by contact identifier.
#[derive(Debug, Default)]
pub struct InMemoryPatientDirectory {
    by_contact: Mutex<HashMap<String, Uuid>>,
}

impl InMemoryPatientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_contact.lock().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PatientDirectory for InMemoryPatientDirectory {
    fn find_or_create_patient(&self, details: &PatientDetails) -> Result<Uuid, DirectoryError> {
        let mut map = self
            .by_contact
            .lock()
            .map_err(|_| DirectoryError::Unavailable("patient directory poisoned".into()))?;
        let id = *map
            .entry(details.contact.clone())
            .or_insert_with(Uuid::new_v4);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::WorkingPeriod;
    use chrono::NaiveTime;

    #[test]
    fn unknown_provider_is_an_error() {
        let dir = InMemoryProviderDirectory::new();
        assert!(matches!(
            dir.schedule_template(Uuid::new_v4(), Weekday::Mon),
            Err(DirectoryError::UnknownProvider(_))
        ));
    }

    #[test]
    fn registered_provider_without_template_is_closed() {
        let mut dir = InMemoryProviderDirectory::new();
        let provider = Uuid::new_v4();
        let template = ScheduleTemplate::new(vec![WorkingPeriod::new(
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
        )
        .unwrap()])
        .unwrap();
        dir.set_template(provider, Weekday::Mon, template);

        assert!(!dir
            .schedule_template(provider, Weekday::Mon)
            .unwrap()
            .is_empty());
        assert!(dir
            .schedule_template(provider, Weekday::Sun)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn patient_resolution_is_stable_per_contact() {
        let dir = InMemoryPatientDirectory::new();
        let ada = PatientDetails {
            name: "Ada".into(),
            contact: "ada@example.com".into(),
        };
        let ada_renamed = PatientDetails {
            name: "Ada L.".into(),
            contact: "ada@example.com".into(),
        };
        let first = dir.find_or_create_patient(&ada).unwrap();
        let second = dir.find_or_create_patient(&ada_renamed).unwrap();
        assert_eq!(first, second);
        assert_eq!(dir.len(), 1);
    }
}
