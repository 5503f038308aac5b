use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use super::*;

async fn setup_pool() -> SqlitePool {
    // one connection, so every query sees the same in-memory database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:").await.unwrap();
    pool.run_migrations().await.unwrap();
    pool
}

#[tokio::test]
async fn jwt_secret_is_stable() {
    let pool = setup_pool().await;

    let first = pool.get_jwt_secret().await.unwrap();
    let second = pool.get_jwt_secret().await.unwrap();

    assert_eq!(first.len(), 32);
    assert_eq!(first, second);
}

#[tokio::test]
async fn users_are_stored_lowercase() {
    let pool = setup_pool().await;
    let user = pool.create_user("Alice", "Alice@Example.com", "Passw0rd", false).await.unwrap();

    assert_eq!(user.username, "alice");
    assert_eq!(user.email, "alice@example.com");
    assert!(pool.does_user_exist("ALICE@example.com").await.unwrap());
    assert!(!pool.does_user_exist("bob@example.com").await.unwrap());
    assert_eq!(pool.get_user_by_username("ALICE").await.unwrap(), Some(user));
}

#[tokio::test]
async fn login_accepts_username_or_email() {
    let pool = setup_pool().await;
    let user = pool.create_user("alice", "alice@example.com", "Passw0rd", false).await.unwrap();

    assert_eq!(pool.verify_user_login("alice", "Passw0rd").await.unwrap(), Some(user.clone()));
    assert_eq!(pool.verify_user_login("alice@example.com", "Passw0rd").await.unwrap(), Some(user));
    assert_eq!(pool.verify_user_login("alice", "wrong").await.unwrap(), None);
    assert_eq!(pool.verify_user_login("nobody", "Passw0rd").await.unwrap(), None);
}

#[tokio::test]
async fn change_password_with_wrong_old_password_writes_nothing() {
    let pool = setup_pool().await;
    let user = pool.create_user("alice", "alice@example.com", "Passw0rd", false).await.unwrap();

    assert!(!pool.change_user_password(user.user_id, "wrong", "NewPassw0rd").await.unwrap());
    assert!(pool.check_user_password(user.user_id, "Passw0rd").await.unwrap().is_some());
    assert!(pool.check_user_password(user.user_id, "NewPassw0rd").await.unwrap().is_none());
}

#[tokio::test]
async fn change_password_replaces_the_old_one() {
    let pool = setup_pool().await;
    let user = pool.create_user("alice", "alice@example.com", "Passw0rd", false).await.unwrap();

    assert!(pool.change_user_password(user.user_id, "Passw0rd", "NewPassw0rd").await.unwrap());
    assert!(pool.check_user_password(user.user_id, "Passw0rd").await.unwrap().is_none());
    assert!(pool.check_user_password(user.user_id, "NewPassw0rd").await.unwrap().is_some());

    // the old password no longer authorizes a second change
    assert!(!pool.change_user_password(user.user_id, "Passw0rd", "Other").await.unwrap());
}

#[tokio::test]
async fn reset_uuid_is_consumed_once() {
    let pool = setup_pool().await;
    let user = pool.create_user("alice", "alice@example.com", "Passw0rd", false).await.unwrap();

    let stored = pool.set_user_reset_uuid("alice@example.com", "token-1").await.unwrap().unwrap();
    assert_eq!(stored.reset_uuid.as_deref(), Some("token-1"));
    assert_eq!(pool.get_user_by_reset_uuid("token-1").await.unwrap().map(|u| u.user_id), Some(user.user_id));

    assert!(pool.reset_user_password("token-1", "Reset123").await.unwrap());
    assert!(pool.check_user_password(user.user_id, "Reset123").await.unwrap().is_some());
    assert!(pool.get_user_by_reset_uuid("token-1").await.unwrap().is_none());

    assert!(!pool.reset_user_password("token-1", "Again123").await.unwrap());
    assert!(pool.check_user_password(user.user_id, "Reset123").await.unwrap().is_some());
}

#[tokio::test]
async fn unknown_reset_uuid_changes_nothing() {
    let pool = setup_pool().await;
    let user = pool.create_user("alice", "alice@example.com", "Passw0rd", false).await.unwrap();

    assert!(!pool.reset_user_password("does-not-exist", "Reset123").await.unwrap());
    assert!(pool.check_user_password(user.user_id, "Passw0rd").await.unwrap().is_some());
}

#[tokio::test]
async fn clearing_reset_uuid_only_removes_the_matching_token() {
    let pool = setup_pool().await;
    let user = pool.create_user("alice", "alice@example.com", "Passw0rd", false).await.unwrap();

    pool.set_user_reset_uuid("alice@example.com", "newer").await.unwrap();
    assert!(!pool.clear_user_reset_uuid(user.user_id, "older").await.unwrap());
    assert!(pool.get_user_by_reset_uuid("newer").await.unwrap().is_some());

    assert!(pool.clear_user_reset_uuid(user.user_id, "newer").await.unwrap());
    assert!(pool.get_user_by_reset_uuid("newer").await.unwrap().is_none());
}

#[tokio::test]
async fn setting_reset_uuid_for_unknown_email_returns_none() {
    let pool = setup_pool().await;
    assert!(pool.set_user_reset_uuid("ghost@example.com", "token").await.unwrap().is_none());
}

#[tokio::test]
async fn project_owner_becomes_project_admin() {
    let pool = setup_pool().await;
    let owner = pool.create_user("alice", "alice@example.com", "Passw0rd", false).await.unwrap();
    let guest = pool.create_user("bob", "bob@example.com", "Passw0rd", false).await.unwrap();

    let project = pool.create_project("library", true, owner.user_id).await.unwrap();
    assert!(project.public);
    assert_eq!(pool.get_project_by_id(project.project_id).await.unwrap(), Some(project.clone()));
    assert_eq!(pool.get_project_by_name("library").await.unwrap(), Some(project.clone()));

    assert_eq!(pool.get_project_role(project.project_id, owner.user_id).await.unwrap(), Some(ProjectRole::ProjectAdmin));
    assert_eq!(pool.get_project_role(project.project_id, guest.user_id).await.unwrap(), None);

    pool.add_project_member(project.project_id, guest.user_id, ProjectRole::Guest).await.unwrap();
    assert_eq!(pool.get_project_role(project.project_id, guest.user_id).await.unwrap(), Some(ProjectRole::Guest));

    pool.add_project_member(project.project_id, guest.user_id, ProjectRole::Developer).await.unwrap();
    assert_eq!(pool.get_project_role(project.project_id, guest.user_id).await.unwrap(), Some(ProjectRole::Developer));
}

#[tokio::test]
async fn missing_project_is_none() {
    let pool = setup_pool().await;
    assert!(pool.get_project_by_id(42).await.unwrap().is_none());
}
