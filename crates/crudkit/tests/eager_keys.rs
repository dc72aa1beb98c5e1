//! Eager loading over keys SQLite stores as TEXT.

use crudkit::session::SqliteSession;
use crudkit::{Filters, ListOptions, LoadOptions, Model, blocking};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Model)]
#[orm(table = "owners")]
#[orm(has_many(name = "pets", table = "pets", foreign_key = "owner_id"))]
struct Owner {
    #[orm(id)]
    id: Uuid,
    name: String,
    #[orm(related = "pets")]
    pets: Vec<Pet>,
}

#[derive(Debug, Clone, PartialEq, Model)]
#[orm(table = "pets")]
#[orm(belongs_to(name = "owner", table = "owners", foreign_key = "owner_id"))]
struct Pet {
    #[orm(id)]
    id: Option<i64>,
    owner_id: Uuid,
    name: String,
    #[orm(related = "owner")]
    owner: Option<Owner>,
}

fn session() -> SqliteSession {
    let s = SqliteSession::open_in_memory().unwrap();
    s.execute_batch(
        "CREATE TABLE owners (id TEXT PRIMARY KEY, name TEXT NOT NULL);
         CREATE TABLE pets (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             owner_id TEXT NOT NULL REFERENCES owners(id),
             name TEXT NOT NULL
         );",
    )
    .unwrap();
    s
}

fn owner(s: &mut SqliteSession, name: &str) -> Uuid {
    let owner = Owner {
        id: Uuid::new_v4(),
        name: name.to_string(),
        pets: Vec::new(),
    };
    blocking::write_row(s, &owner).unwrap().into_payload().unwrap().id
}

fn pet(s: &mut SqliteSession, owner_id: Uuid, name: &str) {
    let pet = Pet {
        id: None,
        owner_id,
        name: name.to_string(),
        owner: None,
    };
    assert!(blocking::write_row(s, &pet).unwrap().is_success());
}

#[test]
fn uuid_keyed_children_attach_to_their_parent() {
    let mut s = session();
    let ann = owner(&mut s, "ann");
    let bob = owner(&mut s, "bob");
    pet(&mut s, ann, "rex");
    pet(&mut s, ann, "tom");
    pet(&mut s, bob, "kit");

    let options = ListOptions::new().load(LoadOptions::new().immediate("pets"));
    let owners = blocking::get_rows::<Owner, _>(&mut s, &Filters::new().sort_by("name", false), &options)
        .unwrap()
        .into_payload();

    assert_eq!(owners[0].id, ann);
    let mut names: Vec<_> = owners[0].pets.iter().map(|p| p.name.as_str()).collect();
    names.sort();
    assert_eq!(names, ["rex", "tom"]);
    assert_eq!(owners[1].id, bob);
    assert_eq!(owners[1].pets.len(), 1);
}

#[test]
fn uuid_keyed_parent_attaches_to_its_children() {
    let mut s = session();
    let ann = owner(&mut s, "ann");
    pet(&mut s, ann, "rex");

    let mut pets = blocking::get_rows::<Pet, _>(&mut s, &Filters::new(), &ListOptions::new())
        .unwrap()
        .into_payload();
    blocking::load_related(&mut s, &mut pets, "owner").unwrap();

    let parent = pets[0].owner.as_ref().unwrap();
    assert_eq!(parent.id, ann);
    assert_eq!(parent.name, "ann");
}
