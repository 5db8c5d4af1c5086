use super::mock::MockTransport;
use crate::client::Client;
use crate::groups::{self, GroupManager};
use crate::gui::{ButtonKind, Registered, Registry, RegistryError};
use crate::store::{Session, Store};
use crate::transport::MemberStatus;
use crate::users::{self, GroupMemberRecord, GroupRecord, Role};

#[test]
fn default_groups_surround_business_handlers() {
    let manager = GroupManager::with_defaults().unwrap();
    assert_eq!(manager.get(groups::CREATE_SESSION).unwrap(), -1000);
    assert_eq!(manager.get(groups::LOAD_USER).unwrap(), -999);
    assert_eq!(manager.get(groups::PROCESS_INPUT).unwrap(), -995);
    assert_eq!(manager.get(groups::CLOSE_SESSION).unwrap(), 1000);
    assert_eq!(manager.get(groups::COMMIT_SESSION).unwrap(), 995);
    assert!(manager.get(groups::ROLLBACK_SESSION).unwrap() > 0);
    assert!(manager.get("NOPE").is_err());
}

#[test]
fn group_names_are_unique() {
    let mut manager = GroupManager::with_defaults().unwrap();
    assert_eq!(manager.add_left("MINE").unwrap(), -994);
    assert!(manager.add_left("MINE").is_err());
    assert!(manager.add_right(groups::LOAD_USER).is_err());
}

#[test]
fn each_side_runs_out_before_zero() {
    let mut manager = GroupManager::new();
    for i in 0..1000 {
        manager.add_left(&format!("left{}", i)).unwrap();
    }
    assert_eq!(manager.get("left999").unwrap(), -1);
    assert!(manager.add_left("one_more").is_err());

    for i in 0..1000 {
        manager.add_right(&format!("right{}", i)).unwrap();
    }
    assert_eq!(manager.get("right999").unwrap(), 1);
    assert!(manager.add_right("one_more").is_err());
}

struct Fake(&'static str, &'static str);

impl Registered for Fake {
    fn tag(&self) -> &str {
        self.0
    }

    fn name(&self) -> &str {
        self.1
    }
}

#[test]
fn registry_rejects_clashes() {
    let mut registry = Registry::new("window");
    registry.register(Fake("MAIN", "main_menu")).unwrap();
    assert!(registry.get("MAIN").is_some());

    let err = registry.register(Fake("MAIN", "other_menu")).unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateTag { ref existing, .. } if existing == "main_menu"));

    let err = registry.register(Fake("SECO", "main_menu")).unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateName { .. }));

    let err = registry.register(Fake("TOO_LONG", "long")).unwrap_err();
    assert!(matches!(err, RegistryError::MalformedTag { .. }));
    let err = registry.register(Fake("a-b!", "symbols")).unwrap_err();
    assert!(matches!(err, RegistryError::MalformedTag { .. }));

    assert_eq!(registry.len(), 1);
}

#[test]
fn builtin_button_kinds_register_cleanly() {
    let mut registry = Registry::new("button");
    for kind in ButtonKind::ALL {
        registry.register(kind).unwrap();
    }
    assert_eq!(registry.get("SBTN"), Some(&ButtonKind::Simple));
    assert_eq!(registry.get("CBOX"), Some(&ButtonKind::CheckBox));
}

const GROUP: i64 = -100;
const OTHER_GROUP: i64 = -200;

async fn seen_in(session: &mut Session, chat_id: i64, title: &str, user_id: i64, role: Role) {
    session
        .add(&mut GroupRecord {
            id: None,
            chat_id,
            title: title.to_string(),
            remove_joins: false,
            remove_leaves: false,
            welcome_text: None,
            created_at: None,
        })
        .await
        .unwrap();
    session
        .add(&mut GroupMemberRecord {
            id: None,
            chat_id,
            user_id,
            role,
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn plain_members_may_not_manage_a_group() {
    let mock = MockTransport::new();
    let client = Client::new(mock.clone(), 1);
    let store = Store::in_memory();
    let mut session = store.begin();
    seen_in(&mut session, GROUP, "Chess club", 5, Role::User).await;

    mock.set_member_status(GROUP, 5, MemberStatus::Member);
    assert!(!users::can_manage_group(&session, &client, GROUP, 5).await.unwrap());
    assert!(users::manageable_groups(&session, &client, 5)
        .await
        .unwrap()
        .is_empty());

    mock.set_member_status(GROUP, 5, MemberStatus::Administrator);
    assert!(users::can_manage_group(&session, &client, GROUP, 5).await.unwrap());
    mock.set_member_status(GROUP, 5, MemberStatus::Owner);
    assert!(users::can_manage_group(&session, &client, GROUP, 5).await.unwrap());
}

#[tokio::test]
async fn admin_role_and_chat_status_both_grant_access() {
    let mock = MockTransport::new();
    let client = Client::new(mock.clone(), 1);
    let store = Store::in_memory();
    let mut session = store.begin();
    seen_in(&mut session, GROUP, "Book club", 7, Role::Admin).await;
    seen_in(&mut session, OTHER_GROUP, "Anime club", 7, Role::User).await;
    mock.set_member_status(OTHER_GROUP, 7, MemberStatus::Administrator);

    let titles: Vec<String> = users::manageable_groups(&session, &client, 7)
        .await
        .unwrap()
        .into_iter()
        .map(|group| group.title)
        .collect();
    assert_eq!(titles, ["Anime club", "Book club"]);

    mock.set_member_status(OTHER_GROUP, 7, MemberStatus::Left);
    let titles: Vec<String> = users::manageable_groups(&session, &client, 7)
        .await
        .unwrap()
        .into_iter()
        .map(|group| group.title)
        .collect();
    assert_eq!(titles, ["Book club"]);
}
