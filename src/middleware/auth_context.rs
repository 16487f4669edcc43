use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use uuid::Uuid;

use crate::auth::hash_access_token;
use crate::error::ApiError;
use crate::models::{AppState, Role};

#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: Role,
    pub session_token_id: Uuid,
    pub full_name: String,
    /// Set for patient accounts linked to a patient record.
    pub patient_id: Option<Uuid>,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_clinic(&self) -> bool {
        self.role.is_clinic()
    }

    pub fn ensure_admin(&self) -> Result<(), ApiError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Only admin can perform this action"))
        }
    }

    pub fn ensure_clinic(&self) -> Result<(), ApiError> {
        if self.is_clinic() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Only admin/staff can perform this action"))
        }
    }

    /// Patients may only touch their own record; clinic users any.
    pub fn ensure_patient_access(&self, patient_id: Uuid) -> Result<(), ApiError> {
        if self.is_clinic() || self.patient_id == Some(patient_id) {
            Ok(())
        } else {
            Err(ApiError::forbidden("You can only access your own records"))
        }
    }

    /// The patient record behind a patient login.
    pub fn own_patient_id(&self) -> Result<Uuid, ApiError> {
        self.patient_id.ok_or_else(|| {
            ApiError::BadRequest(
                "NO_PATIENT_PROFILE",
                "Account has no linked patient record".into(),
            )
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SessionLookupRow {
    session_token_id: Uuid,
    user_id: Uuid,
    role: Role,
    full_name: String,
    patient_id: Option<Uuid>,
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            let TypedHeader(authz): TypedHeader<Authorization<Bearer>> =
                TypedHeader::from_request_parts(parts, state)
                    .await
                    .map_err(|_| ApiError::session_expired())?;

            let token_hash = hash_access_token(authz.token());

            let row: SessionLookupRow = sqlx::query_as::<_, SessionLookupRow>(
                r#"
                SELECT st.session_token_id, st.user_id, u.role, u.full_name, p.patient_id
                FROM session_token st
                JOIN app_user u ON u.user_id = st.user_id
                LEFT JOIN patient p ON p.user_id = u.user_id
                WHERE st.session_token_hash = $1
                  AND st.revoked_at IS NULL
                  AND st.expires_at > now()
                  AND u.is_active = true
                "#,
            )
            .bind(&token_hash)
            .fetch_optional(&state.db)
            .await
            .map_err(ApiError::db)?
            .ok_or_else(ApiError::session_expired)?;

            // best-effort
            let _ = sqlx::query(
                r#"
                UPDATE session_token
                SET last_seen_at = now()
                WHERE session_token_id = $1
                "#,
            )
            .bind(row.session_token_id)
            .execute(&state.db)
            .await;

            Ok(AuthContext {
                user_id: row.user_id,
                role: row.role,
                session_token_id: row.session_token_id,
                full_name: row.full_name,
                patient_id: row.patient_id,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: Role, patient_id: Option<Uuid>) -> AuthContext {
        AuthContext {
            user_id: Uuid::new_v4(),
            role,
            session_token_id: Uuid::new_v4(),
            full_name: "Test User".into(),
            patient_id,
        }
    }

    #[test]
    fn test_role_guards() {
        assert!(ctx(Role::Admin, None).ensure_admin().is_ok());
        assert!(ctx(Role::Staff, None).ensure_admin().is_err());
        assert!(ctx(Role::Staff, None).ensure_clinic().is_ok());
        assert!(ctx(Role::Patient, None).ensure_clinic().is_err());
    }

    #[test]
    fn test_patient_scope() {
        let mine = Uuid::new_v4();
        let patient = ctx(Role::Patient, Some(mine));
        assert!(patient.ensure_patient_access(mine).is_ok());
        assert!(patient.ensure_patient_access(Uuid::new_v4()).is_err());
        assert!(ctx(Role::Staff, None).ensure_patient_access(mine).is_ok());
        assert!(ctx(Role::Patient, None).own_patient_id().is_err());
    }
}
