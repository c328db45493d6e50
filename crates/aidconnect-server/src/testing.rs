//! Fixtures shared by the unit tests of this crate.

use aidconnect_shared::types::{RequestId, RequestStatus, Role, UserId};
use aidconnect_store::{now, HelpRequest, User};

use crate::store::Store;

pub async fn seed_user(store: &Store, role: Role) -> UserId {
    let user = User {
        id: UserId::new(),
        name: format!("{} {}", role.as_str(), &UserId::new().to_string()[..4]),
        role,
        profile_picture: None,
        created_at: now(),
    };
    let id = user.id;
    store.run(move |db| db.upsert_user(&user)).await.unwrap();
    id
}

pub async fn seed_request(
    store: &Store,
    requester: UserId,
    volunteer: UserId,
    status: RequestStatus,
) -> RequestId {
    let request = HelpRequest {
        id: RequestId::new(),
        title: "Groceries".into(),
        status,
        requester_id: requester,
        volunteer_id: Some(volunteer),
        updated_at: now(),
    };
    let id = request.id;
    store.run(move |db| db.upsert_request(&request)).await.unwrap();
    id
}
