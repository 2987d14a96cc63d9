//! Data models for the BlockTrade client core.
//!
//! Wire types follow the platform API's camelCase JSON conventions.

pub mod user;

pub use user::{
    AuthPayload, AuthTokens, ChangePassword, ForgotPassword, LoginRequest, OrganizationType,
    Permission, RegisterRequest, ResetPassword, User, UserProfile, UserRole,
};
