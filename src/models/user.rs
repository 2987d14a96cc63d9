//! User, role, and permission models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    pub role: UserRole,
    pub organization_id: String,
    pub organization_name: String,
    pub organization_type: OrganizationType,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub mfa_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn display_name(&self) -> String {
        match &self.full_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("{} {}", self.first_name, self.last_name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    PlatformSuperAdmin,
    PlatformAdmin,
    PlatformSupport,
    OrganizationSuperAdmin,
    OrganizationAdmin,
    OrganizationManager,
    OrganizationUser,
    OrganizationViewer,
    BankAdmin,
    BankOfficer,
    BankSpecialist,
    CorporateAdmin,
    CorporateManager,
    CorporateUser,
    NbfcAdmin,
    NbfcManager,
    NbfcUser,
    LogisticsAdmin,
    LogisticsManager,
    LogisticsUser,
    InsuranceAdmin,
    InsuranceManager,
    InsuranceUser,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrganizationType {
    Bank,
    Nbfc,
    Corporate,
    Logistics,
    Insurance,
}

/// Fine-grained permissions carried in the user profile.
/// Wire format is the platform's `scope:action` string convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "platform:full_access")]
    PlatformFullAccess,
    #[serde(rename = "platform:user_manage")]
    PlatformUserManage,
    #[serde(rename = "platform:org_manage")]
    PlatformOrgManage,
    #[serde(rename = "platform:role_manage")]
    PlatformRoleManage,
    #[serde(rename = "platform:support")]
    PlatformSupport,
    #[serde(rename = "platform:monitoring")]
    PlatformMonitoring,
    #[serde(rename = "org:full_access")]
    OrgFullAccess,
    #[serde(rename = "org:user_manage")]
    OrgUserManage,
    #[serde(rename = "org:role_assign")]
    OrgRoleAssign,
    #[serde(rename = "org:user_view")]
    OrgUserView,
    #[serde(rename = "business:manage")]
    BusinessManage,
    #[serde(rename = "business:approve")]
    BusinessApprove,
    #[serde(rename = "business:create")]
    BusinessCreate,
    #[serde(rename = "business:view")]
    BusinessView,
    #[serde(rename = "lc:create")]
    LcCreate,
    #[serde(rename = "lc:approve")]
    LcApprove,
    #[serde(rename = "lc:view")]
    LcView,
    #[serde(rename = "lc:edit")]
    LcEdit,
    #[serde(rename = "lc:delete")]
    LcDelete,
    #[serde(rename = "document:upload")]
    DocumentUpload,
    #[serde(rename = "document:verify")]
    DocumentVerify,
    #[serde(rename = "document:view")]
    DocumentView,
    #[serde(rename = "document:manage")]
    DocumentManage,
    #[serde(rename = "payment:process")]
    PaymentProcess,
    #[serde(rename = "payment:view")]
    PaymentView,
    #[serde(rename = "payment:approve")]
    PaymentApprove,
    #[serde(rename = "compliance:manage")]
    ComplianceManage,
    #[serde(rename = "kyc:verify")]
    KycVerify,
    #[serde(rename = "kyc:view")]
    KycView,
    #[serde(rename = "audit:access")]
    AuditAccess,
    #[serde(rename = "report:view")]
    ReportView,
    #[serde(rename = "report:create")]
    ReportCreate,
    #[serde(rename = "report:admin")]
    ReportAdmin,
    #[serde(rename = "analytics:view")]
    AnalyticsView,
    #[serde(rename = "user:manage")]
    UserManage,
    #[serde(rename = "user:create")]
    UserCreate,
    #[serde(rename = "user:view")]
    UserView,
    #[serde(rename = "role:create")]
    RoleCreate,
    #[serde(rename = "role:assign")]
    RoleAssign,
    #[serde(rename = "role:view")]
    RoleView,
}

/// Access/refresh token pair returned by the auth endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// Payload of a successful login/registration/refresh response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthPayload {
    pub user: User,
    pub tokens: AuthTokens,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfa_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remember_me: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub first_name: String,
    pub last_name: String,
    pub organization_name: String,
    pub organization_type: OrganizationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub accept_terms: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePassword {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgotPassword {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPassword {
    pub token: String,
    pub new_password: String,
    pub confirm_password: String,
}
