use std::collections::HashMap;

use uuid::Uuid;

use parley_shared::{AddContactRequest, AppError, AppResult, ContactView, ErrorCode, UpdateContactRequest};

use crate::models::{Contact, User};
use crate::store::{Store, StoreTx};

fn views(tx: &mut dyn StoreTx, owner: &User, contacts: Vec<Contact>) -> AppResult<Vec<ContactView>> {
    let ids: Vec<Uuid> = contacts.iter().map(|c| c.contact_id).collect();
    let users: HashMap<Uuid, User> = tx.users(&ids)?.into_iter().map(|u| (u.id, u)).collect();
    Ok(contacts
        .into_iter()
        .map(|c| ContactView {
            id: c.id,
            contact_id: c.contact_id,
            user: users.get(&c.contact_id).map(|u| u.profile_for(owner.id)),
            name: c.name,
        })
        .collect())
}

/// A contact owned by `owner`. Someone else's contact is forbidden, not absent.
fn owned_contact(tx: &mut dyn StoreTx, owner: &User, id: Uuid) -> AppResult<Contact> {
    let contact = tx
        .contact(id)?
        .ok_or_else(|| AppError::new(ErrorCode::ContactNotFound, "contact not found"))?;
    if contact.owner_id != owner.id {
        return Err(AppError::forbidden("this contact belongs to another user"));
    }
    Ok(contact)
}

pub fn list_contacts(store: &Store, owner: &User) -> AppResult<Vec<ContactView>> {
    store.transaction(|tx| {
        let contacts = tx.contacts_of(owner.id)?;
        views(tx, owner, contacts)
    })
}

pub fn add_contact(store: &Store, owner: &User, req: &AddContactRequest) -> AppResult<ContactView> {
    if req.contact_id == owner.id {
        return Err(AppError::bad_request("cannot add yourself as a contact"));
    }

    store.transaction(|tx| {
        if tx.user(req.contact_id)?.is_none() {
            return Err(AppError::new(ErrorCode::UserNotFound, "user not found"));
        }
        if tx.contact_by_pair(owner.id, req.contact_id)?.is_some() {
            return Err(AppError::new(ErrorCode::DuplicateContact, "contact already exists"));
        }

        let contact = Contact::new(owner.id, req.contact_id, req.name.trim());
        tx.insert_contact(&contact)?;
        tracing::debug!(contact = %contact.id, "contact added");

        let mut added = views(tx, owner, vec![contact])?;
        added.pop().ok_or_else(|| AppError::internal("added contact vanished"))
    })
}

pub fn update_contact(store: &Store, owner: &User, id: Uuid, req: &UpdateContactRequest) -> AppResult<ContactView> {
    store.transaction(|tx| {
        let mut contact = owned_contact(tx, owner, id)?;
        contact.name = req.name.trim().to_string();
        tx.rename_contact(contact.id, &contact.name)?;

        let mut updated = views(tx, owner, vec![contact])?;
        updated.pop().ok_or_else(|| AppError::internal("updated contact vanished"))
    })
}

pub fn delete_contact(store: &Store, owner: &User, id: Uuid) -> AppResult<()> {
    store.transaction(|tx| {
        let contact = owned_contact(tx, owner, id)?;
        tx.delete_contact(contact.id)
    })
}

/// Case-insensitive substring match over the owner's names for their contacts.
pub fn search_contacts(store: &Store, owner: &User, query: &str) -> AppResult<Vec<ContactView>> {
    let needle = query.trim().to_lowercase();
    store.transaction(|tx| {
        let hits: Vec<Contact> = tx
            .contacts_of(owner.id)?
            .into_iter()
            .filter(|c| c.name.to_lowercase().contains(&needle))
            .collect();
        views(tx, owner, hits)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::Fixture;

    fn add(contact: &User, name: &str) -> AddContactRequest {
        AddContactRequest {
            contact_id: contact.id,
            name: name.into(),
        }
    }

    #[test]
    fn add_list_and_search() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");
        let carol = fx.user("carol");

        add_contact(&fx.store, &alice, &add(&bob, "Bobby")).unwrap();
        add_contact(&fx.store, &alice, &add(&carol, "Caz")).unwrap();

        let all = list_contacts(&fx.store, &alice).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].user.as_ref().map(|u| u.id), Some(bob.id));

        let hits = search_contacts(&fx.store, &alice, "bOB").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Bobby");
    }

    #[test]
    fn conflicts_and_missing_users() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");

        add_contact(&fx.store, &alice, &add(&bob, "Bob")).unwrap();
        let err = add_contact(&fx.store, &alice, &add(&bob, "Bob again")).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::DuplicateContact));

        let err = add_contact(&fx.store, &alice, &add(&alice, "me")).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::BadRequest));

        let ghost = AddContactRequest {
            contact_id: Uuid::new_v4(),
            name: "ghost".into(),
        };
        let err = add_contact(&fx.store, &alice, &ghost).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::UserNotFound));
    }

    #[test]
    fn only_the_owner_changes_a_contact() {
        let fx = Fixture::new();
        let alice = fx.user("alice");
        let bob = fx.user("bob");
        let added = add_contact(&fx.store, &alice, &add(&bob, "Bob")).unwrap();

        let rename = UpdateContactRequest { name: "Robert".into() };
        let err = update_contact(&fx.store, &bob, added.id, &rename).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::Forbidden));
        let err = delete_contact(&fx.store, &bob, added.id).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::Forbidden));

        let renamed = update_contact(&fx.store, &alice, added.id, &rename).unwrap();
        assert_eq!(renamed.name, "Robert");

        delete_contact(&fx.store, &alice, added.id).unwrap();
        let err = delete_contact(&fx.store, &alice, added.id).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ContactNotFound));
    }
}
