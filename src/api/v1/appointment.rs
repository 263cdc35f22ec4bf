use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    Json,
};
use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use tap::TapFallible;
use validator::Validate;

use crate::{
    error::Error,
    mongo_ext::Collection,
    util::{FormattedDateTime, ObjectIdString},
};

use super::auth::{AdminSession, CredentialStore, CredentialStoreHandle, Gender, PatientSession};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AppointmentStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

/// Display name of the doctor as submitted at booking time. A snapshot: it
/// can drift from the live account if the doctor is later renamed.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DoctorName {
    pub first_name: String,
    pub last_name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppointmentModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,

    pub patient_id: ObjectId,
    pub doctor_id: ObjectId,
    pub doctor: DoctorName,

    pub appointment_date: bson::DateTime,
    pub department: String,
    #[serde(default)]
    pub status: AppointmentStatus,

    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub nic: String,
    pub dob: bson::DateTime,
    pub gender: Gender,
    pub address: String,
    #[serde(default)]
    pub has_visited: bool,
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn insert(&self, appointment: &AppointmentModel) -> Result<(), Error>;

    async fn find_by_id(&self, id: ObjectId) -> Result<Option<AppointmentModel>, Error>;

    async fn find_all(&self) -> Result<Vec<AppointmentModel>, Error>;

    /// Whole-record replace keyed on the appointment id. Returns false when
    /// the id is unknown.
    async fn update(&self, appointment: &AppointmentModel) -> Result<bool, Error>;

    /// Returns false when the id is unknown.
    async fn delete(&self, id: ObjectId) -> Result<bool, Error>;
}

#[derive(Clone)]
pub struct AppointmentStoreHandle(pub Arc<dyn AppointmentStore>);

impl std::ops::Deref for AppointmentStoreHandle {
    type Target = dyn AppointmentStore;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

#[derive(Clone)]
pub struct AppointmentCollection(pub Collection<AppointmentModel>);

impl std::ops::Deref for AppointmentCollection {
    type Target = Collection<AppointmentModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl AppointmentStore for AppointmentCollection {
    async fn insert(&self, appointment: &AppointmentModel) -> Result<(), Error> {
        self.insert_one(appointment, None)
            .await
            .map(|_| ())
            .map_err(Into::into)
    }

    async fn find_by_id(&self, id: ObjectId) -> Result<Option<AppointmentModel>, Error> {
        self.find_one_by_id(id).await
    }

    async fn find_all(&self) -> Result<Vec<AppointmentModel>, Error> {
        self.collect_all(None).await
    }

    async fn update(&self, appointment: &AppointmentModel) -> Result<bool, Error> {
        let result = self
            .replace_one(
                bson::doc! {
                    "_id": appointment.id
                },
                appointment,
                None,
            )
            .await?;

        Ok(result.matched_count > 0)
    }

    async fn delete(&self, id: ObjectId) -> Result<bool, Error> {
        let result = self
            .delete_one(
                bson::doc! {
                    "_id": id
                },
                None,
            )
            .await?;

        Ok(result.deleted_count > 0)
    }
}

/// Maps a human-entered doctor reference to exactly one account. The lookup
/// and the appointment insert that follows are separate store operations; a
/// doctor created or renamed in between is an accepted narrow race.
pub async fn resolve_doctor(
    users: &CredentialStoreHandle,
    first_name: &str,
    last_name: &str,
    department: &str,
) -> Result<ObjectId, Error> {
    let mut doctors = users
        .find_all_doctors_by_name_and_department(first_name, last_name, department)
        .await?;

    match doctors.len() {
        0 => Err(Error::NotFound("Doctor"))
            .tap_err(|_| tracing::debug!("no doctor matches the submitted reference")),
        1 => Ok(doctors.remove(0).id),
        // never guess among same-named doctors
        _ => Err(Error::DoctorConflict)
            .tap_err(|_| tracing::debug!("doctor reference matches more than one account")),
    }
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct AppointmentRequest {
    #[validate(length(min = 3, message = "First Name Must Contain At Least 3 Characters!"))]
    pub first_name: String,

    #[validate(length(min = 3, message = "Last Name Must Contain At Least 3 Characters!"))]
    pub last_name: String,

    #[validate(email(message = "Provide A Valid Email!"))]
    pub email: String,

    #[validate(length(equal = 11, message = "Phone Number Must Contain Exact 11 Digits!"))]
    pub phone: String,

    #[validate(length(equal = 13, message = "NIC Must Contain Only 13 Digits!"))]
    pub nic: String,

    pub dob: FormattedDateTime,

    pub gender: Gender,

    pub appointment_date: FormattedDateTime,

    #[validate(length(min = 1, message = "Please Fill Full Form!"))]
    pub department: String,

    #[validate(length(min = 1, message = "Please Fill Full Form!"))]
    pub doctor_first_name: String,

    #[validate(length(min = 1, message = "Please Fill Full Form!"))]
    pub doctor_last_name: String,

    #[validate(length(min = 1, message = "Please Fill Full Form!"))]
    pub address: String,

    #[serde(default)]
    pub has_visited: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AppointmentResponse {
    pub id: ObjectIdString,

    pub patient_id: ObjectIdString,
    pub doctor_id: ObjectIdString,
    pub doctor: DoctorName,

    pub appointment_date: FormattedDateTime,
    pub department: String,
    pub status: AppointmentStatus,

    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub nic: String,
    pub dob: FormattedDateTime,
    pub gender: Gender,
    pub address: String,
    pub has_visited: bool,
}

impl From<AppointmentModel> for AppointmentResponse {
    fn from(value: AppointmentModel) -> Self {
        Self {
            id: value.id.into(),

            patient_id: value.patient_id.into(),
            doctor_id: value.doctor_id.into(),
            doctor: value.doctor,

            appointment_date: value.appointment_date.into(),
            department: value.department,
            status: value.status,

            first_name: value.first_name,
            last_name: value.last_name,
            email: value.email,
            phone: value.phone,
            nic: value.nic,
            dob: value.dob.into(),
            gender: value.gender,
            address: value.address,
            has_visited: value.has_visited,
        }
    }
}

#[tracing::instrument(skip_all, fields(patient = %patient.0.id))]
pub async fn post_appointment(
    State(users): State<CredentialStoreHandle>,
    State(appointments): State<AppointmentStoreHandle>,
    patient: PatientSession,
    Json(request): Json<AppointmentRequest>,
) -> Result<Json<AppointmentResponse>, Error> {
    request.validate()?;

    let doctor_id = resolve_doctor(
        &users,
        &request.doctor_first_name,
        &request.doctor_last_name,
        &request.department,
    )
    .await?;

    // The owner comes from the verified session. Identity-shaped form fields
    // are stored as snapshot data only and can never rebind the appointment
    // to another account.
    let model = AppointmentModel {
        id: ObjectId::new(),
        patient_id: patient.0.id,
        doctor_id,
        doctor: DoctorName {
            first_name: request.doctor_first_name,
            last_name: request.doctor_last_name,
        },
        appointment_date: request.appointment_date.into(),
        department: request.department,
        status: AppointmentStatus::Pending,
        first_name: request.first_name,
        last_name: request.last_name,
        email: request.email,
        phone: request.phone,
        nic: request.nic,
        dob: request.dob.into(),
        gender: request.gender,
        address: request.address,
        has_visited: request.has_visited,
    };

    tracing::debug!("creating appointment {:?}", model.id);
    appointments.insert(&model).await?;

    Ok(Json(model.into()))
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AppointmentsResponse {
    pub appointments: Vec<AppointmentResponse>,
}

pub async fn get_all_appointments(
    State(appointments): State<AppointmentStoreHandle>,
    _session: AdminSession,
) -> Result<Json<AppointmentsResponse>, Error> {
    let appointments = appointments.find_all().await?;

    Ok(Json(AppointmentsResponse {
        appointments: appointments.into_iter().map(Into::into).collect(),
    }))
}

#[derive(Validate, Serialize, Deserialize, Debug, Clone)]
pub struct UpdateAppointmentRequest {
    #[validate(length(min = 3, message = "First Name Must Contain At Least 3 Characters!"))]
    pub first_name: String,

    #[validate(length(min = 3, message = "Last Name Must Contain At Least 3 Characters!"))]
    pub last_name: String,

    #[validate(email(message = "Provide A Valid Email!"))]
    pub email: String,

    #[validate(length(equal = 11, message = "Phone Number Must Contain Exact 11 Digits!"))]
    pub phone: String,

    #[validate(length(equal = 13, message = "NIC Must Contain Only 13 Digits!"))]
    pub nic: String,

    pub dob: FormattedDateTime,

    pub gender: Gender,

    pub appointment_date: FormattedDateTime,

    #[validate(length(min = 1, message = "Please Fill Full Form!"))]
    pub department: String,

    #[validate(length(min = 1, message = "Please Fill Full Form!"))]
    pub address: String,

    #[serde(default)]
    pub has_visited: bool,

    pub status: AppointmentStatus,
}

#[tracing::instrument(skip_all, fields(id = %appointment_id))]
pub async fn update_appointment_status(
    State(appointments): State<AppointmentStoreHandle>,
    _session: AdminSession,
    Path(appointment_id): Path<String>,
    Json(request): Json<UpdateAppointmentRequest>,
) -> Result<Json<AppointmentResponse>, Error> {
    // The replacement record obeys the same constraints as creation.
    request.validate()?;

    let appointment_id = ObjectId::from_str(&appointment_id)
        .map_err(|_| Error::NotFound("Appointment"))
        .tap_err(|_| tracing::debug!("tried updating with malformed appointment id"))?;

    let existing = appointments
        .find_by_id(appointment_id)
        .await?
        .ok_or_else(|| Error::NotFound("Appointment"))
        .tap_err(|_| tracing::debug!("tried updating non existing appointment"))?;

    // Owner and resolved doctor were pinned at booking time; a status patch
    // replaces everything else.
    let appointment = AppointmentModel {
        id: existing.id,
        patient_id: existing.patient_id,
        doctor_id: existing.doctor_id,
        doctor: existing.doctor,

        appointment_date: request.appointment_date.into(),
        department: request.department,
        status: request.status,

        first_name: request.first_name,
        last_name: request.last_name,
        email: request.email,
        phone: request.phone,
        nic: request.nic,
        dob: request.dob.into(),
        gender: request.gender,
        address: request.address,
        has_visited: request.has_visited,
    };

    tracing::debug!("updating appointment {:?}", appointment.id);
    let matched = appointments.update(&appointment).await?;

    if !matched {
        return Err(Error::NotFound("Appointment"));
    }

    Ok(Json(appointment.into()))
}

#[tracing::instrument(skip_all, fields(id = %appointment_id))]
pub async fn delete_appointment(
    State(appointments): State<AppointmentStoreHandle>,
    _session: AdminSession,
    Path(appointment_id): Path<String>,
) -> Result<(), Error> {
    let appointment_id = ObjectId::from_str(&appointment_id)
        .map_err(|_| Error::NotFound("Appointment"))
        .tap_err(|_| tracing::debug!("tried deleting with malformed appointment id"))?;

    let deleted = appointments.delete(appointment_id).await?;

    if !deleted {
        return Err(Error::NotFound("Appointment"))
            .tap_err(|_| tracing::debug!("tried deleting non existing appointment"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::{extract::Path, Json};
    use bson::oid::ObjectId;

    use crate::{
        api::v1::{auth::UserRole, tests::bootstrap},
        error::Error,
    };

    use super::{resolve_doctor, AppointmentStatus};

    fn appointment_request(
        doctor_first_name: &str,
        doctor_last_name: &str,
        department: &str,
    ) -> super::AppointmentRequest {
        super::AppointmentRequest {
            first_name: "Sarah".to_string(),
            last_name: "Connor".to_string(),
            email: "sarah@test.com".to_string(),
            phone: "01234567890".to_string(),
            nic: "1234567890123".to_string(),
            dob: time::macros::datetime!(1990-01-01 0:00 UTC).into(),
            gender: super::Gender::Female,
            appointment_date: time::macros::datetime!(2030-06-01 9:00 UTC).into(),
            department: department.to_string(),
            doctor_first_name: doctor_first_name.to_string(),
            doctor_last_name: doctor_last_name.to_string(),
            address: "1 Main Street".to_string(),
            has_visited: false,
        }
    }

    #[tokio::test]
    async fn test_resolve_doctor() {
        let bootstrap = bootstrap().await;

        let doctor = bootstrap
            .derive_doctor("Jane", "Smith", "jane@test.com", "Cardiology")
            .await;

        let resolved = resolve_doctor(
            &bootstrap.app_state.users,
            "Jane",
            "Smith",
            "Cardiology",
        )
        .await
        .unwrap();

        assert_eq!(resolved, doctor.user_id());
    }

    #[tokio::test]
    async fn test_resolve_doctor_not_found() {
        let bootstrap = bootstrap().await;

        let err = resolve_doctor(&bootstrap.app_state.users, "Jane", "Smith", "Cardiology")
            .await
            .unwrap_err();

        assert_matches!(err, Error::NotFound("Doctor"));
    }

    #[tokio::test]
    async fn test_resolve_doctor_requires_exact_triple() {
        let bootstrap = bootstrap().await;

        let _ = bootstrap
            .derive_doctor("Jane", "Smith", "jane@test.com", "Cardiology")
            .await;

        // same name, different department
        let err = resolve_doctor(&bootstrap.app_state.users, "Jane", "Smith", "Neurology")
            .await
            .unwrap_err();
        assert_matches!(err, Error::NotFound("Doctor"));

        // case differs: stored references match exactly or not at all
        let err = resolve_doctor(&bootstrap.app_state.users, "jane", "Smith", "Cardiology")
            .await
            .unwrap_err();
        assert_matches!(err, Error::NotFound("Doctor"));
    }

    #[tokio::test]
    async fn test_resolve_doctor_conflict() {
        let bootstrap = bootstrap().await;

        let _ = bootstrap
            .derive_doctor("Jane", "Smith", "jane1@test.com", "Cardiology")
            .await;
        let _ = bootstrap
            .derive_doctor("Jane", "Smith", "jane2@test.com", "Cardiology")
            .await;

        let err = resolve_doctor(&bootstrap.app_state.users, "Jane", "Smith", "Cardiology")
            .await
            .unwrap_err();

        assert_matches!(err, Error::DoctorConflict);
    }

    #[tokio::test]
    async fn test_post_appointment() {
        let bootstrap = bootstrap().await;

        let doctor = bootstrap
            .derive_doctor("Jane", "Smith", "jane@test.com", "Cardiology")
            .await;
        let patient = bootstrap
            .derive("patient@test.com", "password", UserRole::Patient)
            .await;

        let Json(appointment) = super::post_appointment(
            bootstrap.users(),
            bootstrap.appointments(),
            patient.patient_session(),
            Json(appointment_request("Jane", "Smith", "Cardiology")),
        )
        .await
        .unwrap();

        assert_eq!(appointment.patient_id, patient.user_id());
        assert_eq!(appointment.doctor_id, doctor.user_id());
        assert_eq!(appointment.status, AppointmentStatus::Pending);
        assert_eq!(appointment.doctor.first_name, "Jane");
    }

    #[tokio::test]
    async fn test_post_appointment_owner_comes_from_session() {
        let bootstrap = bootstrap().await;

        let _ = bootstrap
            .derive_doctor("Jane", "Smith", "jane@test.com", "Cardiology")
            .await;
        let patient = bootstrap
            .derive("patient@test.com", "password", UserRole::Patient)
            .await;
        let other = bootstrap
            .derive("other@test.com", "password", UserRole::Patient)
            .await;

        // the form carries the other patient's name and email; the stored
        // owner is still the session identity
        let mut request = appointment_request("Jane", "Smith", "Cardiology");
        request.first_name = other.user_model.first_name.clone();
        request.last_name = other.user_model.last_name.clone();
        request.email = other.user_model.email.clone();

        let Json(appointment) = super::post_appointment(
            bootstrap.users(),
            bootstrap.appointments(),
            patient.patient_session(),
            Json(request),
        )
        .await
        .unwrap();

        assert_eq!(appointment.patient_id, patient.user_id());
        assert_ne!(appointment.patient_id, other.user_id());
    }

    #[tokio::test]
    async fn test_post_appointment_doctor_not_found() {
        let bootstrap = bootstrap().await;

        let patient = bootstrap
            .derive("patient@test.com", "password", UserRole::Patient)
            .await;

        let err = super::post_appointment(
            bootstrap.users(),
            bootstrap.appointments(),
            patient.patient_session(),
            Json(appointment_request("Jane", "Smith", "Cardiology")),
        )
        .await
        .unwrap_err();

        assert_matches!(err, Error::NotFound("Doctor"));

        // no partial commit
        assert!(bootstrap
            .memory_appointments
            .is_empty());
    }

    #[tokio::test]
    async fn test_post_appointment_doctor_conflict() {
        let bootstrap = bootstrap().await;

        let _ = bootstrap
            .derive_doctor("Jane", "Smith", "jane1@test.com", "Cardiology")
            .await;
        let _ = bootstrap
            .derive_doctor("Jane", "Smith", "jane2@test.com", "Cardiology")
            .await;
        let patient = bootstrap
            .derive("patient@test.com", "password", UserRole::Patient)
            .await;

        let err = super::post_appointment(
            bootstrap.users(),
            bootstrap.appointments(),
            patient.patient_session(),
            Json(appointment_request("Jane", "Smith", "Cardiology")),
        )
        .await
        .unwrap_err();

        assert_matches!(err, Error::DoctorConflict);
        assert!(bootstrap.memory_appointments.is_empty());
    }

    #[tokio::test]
    async fn test_get_all_appointments() {
        let bootstrap = bootstrap().await;

        let _ = bootstrap
            .derive_doctor("Jane", "Smith", "jane@test.com", "Cardiology")
            .await;
        let patient = bootstrap
            .derive("patient@test.com", "password", UserRole::Patient)
            .await;

        let _ = super::post_appointment(
            bootstrap.users(),
            bootstrap.appointments(),
            patient.patient_session(),
            Json(appointment_request("Jane", "Smith", "Cardiology")),
        )
        .await
        .unwrap();

        let Json(response) =
            super::get_all_appointments(bootstrap.appointments(), bootstrap.admin_session())
                .await
                .unwrap();

        assert_eq!(response.appointments.len(), 1);
    }

    #[tokio::test]
    async fn test_update_appointment_status() {
        let bootstrap = bootstrap().await;

        let _ = bootstrap
            .derive_doctor("Jane", "Smith", "jane@test.com", "Cardiology")
            .await;
        let patient = bootstrap
            .derive("patient@test.com", "password", UserRole::Patient)
            .await;

        let Json(appointment) = super::post_appointment(
            bootstrap.users(),
            bootstrap.appointments(),
            patient.patient_session(),
            Json(appointment_request("Jane", "Smith", "Cardiology")),
        )
        .await
        .unwrap();

        let request = appointment_request("Jane", "Smith", "Cardiology");
        let Json(updated) = super::update_appointment_status(
            bootstrap.appointments(),
            bootstrap.admin_session(),
            Path(appointment.id.to_string()),
            Json(super::UpdateAppointmentRequest {
                first_name: request.first_name,
                last_name: request.last_name,
                email: request.email,
                phone: request.phone,
                nic: request.nic,
                dob: request.dob,
                gender: request.gender,
                appointment_date: request.appointment_date,
                department: request.department,
                address: request.address,
                has_visited: true,
                status: AppointmentStatus::Accepted,
            }),
        )
        .await
        .unwrap();

        assert_eq!(updated.status, AppointmentStatus::Accepted);
        assert!(updated.has_visited);
        // pinned at booking time
        assert_eq!(updated.patient_id, appointment.patient_id);
        assert_eq!(updated.doctor_id, appointment.doctor_id);
    }

    #[tokio::test]
    async fn test_update_appointment_revalidates() {
        let bootstrap = bootstrap().await;

        let _ = bootstrap
            .derive_doctor("Jane", "Smith", "jane@test.com", "Cardiology")
            .await;
        let patient = bootstrap
            .derive("patient@test.com", "password", UserRole::Patient)
            .await;

        let Json(appointment) = super::post_appointment(
            bootstrap.users(),
            bootstrap.appointments(),
            patient.patient_session(),
            Json(appointment_request("Jane", "Smith", "Cardiology")),
        )
        .await
        .unwrap();

        let request = appointment_request("Jane", "Smith", "Cardiology");
        let err = super::update_appointment_status(
            bootstrap.appointments(),
            bootstrap.admin_session(),
            Path(appointment.id.to_string()),
            Json(super::UpdateAppointmentRequest {
                first_name: request.first_name,
                last_name: request.last_name,
                email: request.email,
                phone: "123".to_string(),
                nic: request.nic,
                dob: request.dob,
                gender: request.gender,
                appointment_date: request.appointment_date,
                department: request.department,
                address: request.address,
                has_visited: false,
                status: AppointmentStatus::Accepted,
            }),
        )
        .await
        .unwrap_err();

        assert_matches!(err, Error::ValidationError(_));
    }

    #[tokio::test]
    async fn test_update_non_existing_appointment() {
        let bootstrap = bootstrap().await;

        let request = appointment_request("Jane", "Smith", "Cardiology");
        let err = super::update_appointment_status(
            bootstrap.appointments(),
            bootstrap.admin_session(),
            Path(ObjectId::new().to_string()),
            Json(super::UpdateAppointmentRequest {
                first_name: request.first_name,
                last_name: request.last_name,
                email: request.email,
                phone: request.phone,
                nic: request.nic,
                dob: request.dob,
                gender: request.gender,
                appointment_date: request.appointment_date,
                department: request.department,
                address: request.address,
                has_visited: false,
                status: AppointmentStatus::Accepted,
            }),
        )
        .await
        .unwrap_err();

        assert_matches!(err, Error::NotFound("Appointment"));
    }

    #[tokio::test]
    async fn test_delete_appointment() {
        let bootstrap = bootstrap().await;

        let _ = bootstrap
            .derive_doctor("Jane", "Smith", "jane@test.com", "Cardiology")
            .await;
        let patient = bootstrap
            .derive("patient@test.com", "password", UserRole::Patient)
            .await;

        let Json(appointment) = super::post_appointment(
            bootstrap.users(),
            bootstrap.appointments(),
            patient.patient_session(),
            Json(appointment_request("Jane", "Smith", "Cardiology")),
        )
        .await
        .unwrap();

        super::delete_appointment(
            bootstrap.appointments(),
            bootstrap.admin_session(),
            Path(appointment.id.to_string()),
        )
        .await
        .unwrap();

        let err = super::delete_appointment(
            bootstrap.appointments(),
            bootstrap.admin_session(),
            Path(appointment.id.to_string()),
        )
        .await
        .unwrap_err();

        assert_matches!(err, Error::NotFound("Appointment"));
    }
}
