use chrono::Utc;
use tracing::info;

use super::{
    input::{AdminUserUpdate, LoginInput, PasswordChange, ProfileUpdate, RegisterInput},
    next_id, require_text, FarmStore,
};
use crate::{
    auth::password::{check_password_policy, hash_off_thread, verify_off_thread},
    db::models::{Role, User},
    error::{FarmError, FarmResult},
};

fn normalize_email(email: &str) -> FarmResult<String> {
    let email = require_text("email", email)?.to_lowercase();
    if !email.contains('@') {
        return Err(FarmError::validation("Invalid email address"));
    }
    Ok(email)
}

/// Rejects `username`/`email` already used by someone other than `except`.
fn check_unique(users: &[User], username: &str, email: &str, except: Option<u64>) -> FarmResult<()> {
    let others = || users.iter().filter(|u| Some(u.id) != except);
    if others().any(|u| u.username.eq_ignore_ascii_case(username)) {
        return Err(FarmError::Conflict(format!("Username {username} is already taken")));
    }
    if others().any(|u| u.email.eq_ignore_ascii_case(email)) {
        return Err(FarmError::Conflict(format!("Email {email} is already registered")));
    }
    Ok(())
}

fn find_mut(users: &mut [User], id: u64) -> FarmResult<&mut User> {
    users
        .iter_mut()
        .find(|u| u.id == id)
        .ok_or_else(|| FarmError::not_found("User", id))
}

impl FarmStore {
    /// The first account ever registered becomes an admin.
    pub async fn register(&self, input: RegisterInput) -> FarmResult<User> {
        let username = require_text("username", &input.username)?;
        let email = normalize_email(&input.email)?;
        if input.password.is_empty() {
            return Err(FarmError::validation("Missing required field: password"));
        }
        check_password_policy(&input.password)?;
        let password_hash = hash_off_thread(input.password.clone()).await?;

        let user = self
            .mutate(|users: &mut Vec<User>| {
                check_unique(users, &username, &email, None)?;
                let now = Utc::now();
                let user = User {
                    id: next_id(users.iter().map(|u| u.id)),
                    username,
                    email,
                    password_hash,
                    role: if users.is_empty() { Role::Admin } else { Role::User },
                    is_active: true,
                    last_login: None,
                    created_at: now,
                    updated_at: now,
                };
                users.push(user.clone());
                Ok(user)
            })
            .await?;
        info!(user_id = user.id, role = ?user.role, "User registered");
        Ok(user)
    }

    /// Checks credentials and stamps `last_login`.
    pub async fn authenticate(&self, input: LoginInput) -> FarmResult<User> {
        let invalid = || FarmError::Unauthorized("Invalid email or password".into());
        let email = input.email.trim().to_lowercase();

        let users: Vec<User> = self.read().await?;
        let user = users
            .into_iter()
            .find(|u| u.email == email)
            .ok_or_else(invalid)?;
        let matches = verify_off_thread(input.password.clone(), user.password_hash.clone()).await?;
        if !matches {
            return Err(invalid());
        }
        if !user.is_active {
            return Err(FarmError::Forbidden("User account is deactivated".into()));
        }

        self.mutate(|users: &mut Vec<User>| {
            let u = find_mut(users, user.id)?;
            u.last_login = Some(Utc::now());
            Ok(u.clone())
        })
        .await
    }

    pub async fn get_user(&self, id: u64) -> FarmResult<User> {
        let users: Vec<User> = self.read().await?;
        users
            .into_iter()
            .find(|u| u.id == id)
            .ok_or_else(|| FarmError::not_found("User", id))
    }

    pub async fn list_users(&self) -> FarmResult<Vec<User>> {
        self.read().await
    }

    pub async fn update_profile(&self, id: u64, update: ProfileUpdate) -> FarmResult<User> {
        let username = update
            .username
            .as_deref()
            .map(|u| require_text("username", u))
            .transpose()?;
        let email = update.email.as_deref().map(normalize_email).transpose()?;

        self.mutate(|users: &mut Vec<User>| {
            let current = users
                .iter()
                .find(|u| u.id == id)
                .ok_or_else(|| FarmError::not_found("User", id))?;
            let new_username = username.unwrap_or_else(|| current.username.clone());
            let new_email = email.unwrap_or_else(|| current.email.clone());
            check_unique(users, &new_username, &new_email, Some(id))?;

            let u = find_mut(users, id)?;
            u.username = new_username;
            u.email = new_email;
            u.updated_at = Utc::now();
            Ok(u.clone())
        })
        .await
    }

    pub async fn change_password(&self, id: u64, change: PasswordChange) -> FarmResult<()> {
        let user = self.get_user(id).await?;
        if !verify_off_thread(change.current_password.clone(), user.password_hash).await? {
            return Err(FarmError::validation("Current password is incorrect"));
        }
        check_password_policy(&change.new_password)?;
        let password_hash = hash_off_thread(change.new_password.clone()).await?;

        self.mutate(|users: &mut Vec<User>| {
            let u = find_mut(users, id)?;
            u.password_hash = password_hash;
            u.updated_at = Utc::now();
            Ok(())
        })
        .await?;
        info!(user_id = id, "Password changed");
        Ok(())
    }

    pub async fn admin_update_user(&self, id: u64, update: AdminUserUpdate) -> FarmResult<User> {
        let user = self
            .update_profile(
                id,
                ProfileUpdate {
                    username: update.username,
                    email: update.email,
                },
            )
            .await?;
        if update.role.is_none() && update.is_active.is_none() {
            return Ok(user);
        }
        self.mutate(|users: &mut Vec<User>| {
            let u = find_mut(users, id)?;
            if let Some(role) = update.role {
                u.role = role;
            }
            if let Some(active) = update.is_active {
                u.is_active = active;
            }
            u.updated_at = Utc::now();
            Ok(u.clone())
        })
        .await
    }

    /// `acting_id` is the admin making the request.
    pub async fn delete_user(&self, acting_id: u64, id: u64) -> FarmResult<()> {
        if acting_id == id {
            return Err(FarmError::validation("You cannot delete your own account"));
        }
        self.mutate(|users: &mut Vec<User>| {
            let before = users.len();
            users.retain(|u| u.id != id);
            if users.len() == before {
                return Err(FarmError::not_found("User", id));
            }
            Ok(())
        })
        .await?;
        info!(user_id = id, "User deleted");
        Ok(())
    }
}
