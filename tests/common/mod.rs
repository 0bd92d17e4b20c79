//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use std::sync::Arc;

use quadstream::db::{Db, DbBuilder};
use quadstream::flake::{Object, Pid, Sid, dt};
use quadstream::schema::PropertyInfo;

/// Three people with ages and names: the basic scan/filter/order fixture.
pub struct PeopleDb {
    pub db: Arc<Db>,
    pub age: Pid,
    pub name: Pid,
    pub ann: Sid,
    pub bob: Sid,
    pub cay: Sid,
}

pub fn people_db() -> PeopleDb {
    let mut b = DbBuilder::new();
    let age = b.predicate(PropertyInfo::scalar("ex:age", dt::LONG));
    let name = b.predicate(PropertyInfo::scalar("ex:name", dt::STRING));
    let ann = b.subject("ex:A");
    let bob = b.subject("ex:B");
    let cay = b.subject("ex:C");
    b.assert(ann, age, Object::Int(30));
    b.assert(bob, age, Object::Int(25));
    b.assert(cay, age, Object::Int(40));
    b.assert(ann, name, Object::str("Ann"));
    b.assert(bob, name, Object::str("Bob"));
    b.assert(cay, name, Object::str("Cay"));
    PeopleDb { db: b.build(), age, name, ann, bob, cay }
}

/// `Dog ⊂ Mammal ⊂ Animal` with one dog: the class-expansion fixture.
pub struct ZooDb {
    pub db: Arc<Db>,
    pub animal: Sid,
    pub mammal: Sid,
    pub dog: Sid,
    pub rex: Sid,
}

pub fn zoo_db() -> ZooDb {
    let mut b = DbBuilder::new();
    let animal = b.class("ex:Animal");
    let mammal = b.class("ex:Mammal");
    let dog = b.class("ex:Dog");
    b.subclass_of(mammal, animal);
    b.subclass_of(dog, mammal);
    let rex = b.subject("ex:rex");
    b.type_of(rex, dog, 1);
    ZooDb { db: b.build(), animal, mammal, dog, rex }
}
