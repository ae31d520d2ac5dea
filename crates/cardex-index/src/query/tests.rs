use super::*;
use crate::store::{IndexWriter, PublishOptions};
use cardex_core::schema::{base_card_ref, CardDecl, FieldDef, FieldKind, ModuleDef, Queryable, BASE_CARD_API};
use cardex_core::CardRef;
use serde_json::json;

const REALM: &str = "http://r/";

fn string_field() -> CodeRef {
    CodeRef::new(BASE_CARD_API, "StringField")
}

fn book_ref() -> CodeRef {
    CodeRef::new("http://r/book", "Book")
}

fn module_entry(file_url: &str, def: ModuleDef) -> IndexedEntry {
    IndexedEntry::module(file_url, serde_json::to_value(def).unwrap())
}

fn person_module() -> ModuleDef {
    let mut def = ModuleDef {
        url: "http://r/person".into(),
        ..Default::default()
    };
    def.exports.insert(
        "Person".into(),
        CardDecl::card(Some(base_card_ref().into()))
            .with_field(FieldDef::new("firstName", FieldKind::Contains, string_field()))
            .with_field(FieldDef::new("lastName", FieldKind::Contains, string_field()))
            .with_field(FieldDef::new("favoriteBook", FieldKind::LinksTo, book_ref())),
    );
    def
}

fn book_module() -> ModuleDef {
    let mut def = ModuleDef {
        url: "http://r/book".into(),
        imports: vec!["http://r/person".into()],
        ..Default::default()
    };
    def.exports.insert(
        "Status".into(),
        CardDecl::primitive_field(Some(Queryable::Ordinal {
            values: vec![json!("draft"), json!("review"), json!("published")],
        })),
    );
    def.exports.insert(
        "Book".into(),
        CardDecl::card(Some(base_card_ref().into()))
            .with_field(FieldDef::new(
                "editions",
                FieldKind::Contains,
                CodeRef::new(BASE_CARD_API, "NumberField"),
            ))
            .with_field(FieldDef::new(
                "author",
                FieldKind::LinksTo,
                CodeRef::new("http://r/person", "Person"),
            ))
            .with_field(FieldDef::new("tags", FieldKind::ContainsMany, string_field()))
            .with_field(FieldDef::new(
                "status",
                FieldKind::Contains,
                CodeRef::new("http://r/book", "Status"),
            )),
    );
    def.exports.insert(
        "FancyBook".into(),
        CardDecl::card(Some(CardRef::Exported(book_ref()))),
    );
    def
}

fn book_types(fancy: bool) -> Vec<String> {
    let mut types = Vec::new();
    if fancy {
        types.push("http://r/book/FancyBook".to_string());
    }
    types.push("http://r/book/Book".to_string());
    types.push(format!("{}/CardDef", BASE_CARD_API));
    types
}

fn book(n: u32, search: Value, fancy: bool) -> IndexedEntry {
    let id = format!("http://r/Book/{}", n);
    let pristine = json!({"data": {"id": id, "type": "card", "relationships": {}}});
    let mut search = search;
    search["id"] = json!(id);
    IndexedEntry::instance(format!("{}.json", id), pristine, search).with_types(book_types(fancy))
}

fn fixture() -> (IndexWriter, Arc<RealmSnapshot>) {
    let writer = IndexWriter::temporary().unwrap();
    let mango_author = json!({"id": "http://r/Person/mango", "firstName": "Mango", "lastName": "Abdel-Rahman"});

    let mut book1 = book(
        1,
        json!({"title": "Mango's Adventures", "editions": 3, "author": mango_author,
               "tags": ["dog", "adventure"], "status": "published"}),
        false,
    );
    book1.pristine_doc = Some(json!({"data": {
        "id": "http://r/Book/1", "type": "card",
        "relationships": {"author": {"links": {"self": "http://r/Person/mango"}}}
    }}));

    let mango = IndexedEntry::instance(
        "http://r/Person/mango.json",
        json!({"data": {
            "id": "http://r/Person/mango", "type": "card",
            "relationships": {"favoriteBook": {"links": {"self": "http://r/Book/1"}}}
        }}),
        json!({"id": "http://r/Person/mango", "firstName": "Mango", "lastName": "Abdel-Rahman",
               "favoriteBook": {"id": "http://r/Book/1"}}),
    )
    .with_types(vec![
        "http://r/person/Person".to_string(),
        format!("{}/CardDef", BASE_CARD_API),
    ]);

    let entries = vec![
        module_entry("http://r/person.gts", person_module()),
        module_entry("http://r/book.gts", book_module()),
        book1,
        book(
            2,
            json!({"title": "Bread", "editions": 3, "author": {"id": "http://r/Person/b", "lastName": "Baker"},
                   "tags": [], "status": "draft"}),
            false,
        ),
        book(
            3,
            json!({"title": "Quiet", "editions": 1, "author": null, "tags": ["calm"], "status": "review"}),
            false,
        ),
        book(
            4,
            json!({"title": "Shiny", "author": {"id": "http://r/Person/mango", "lastName": "Abdel-Rahman"},
                   "status": "published"}),
            true,
        ),
        book(5, json!({"title": "Blank", "editions": 3, "author": null, "status": null}), false),
        mango,
    ];
    writer.publish(REALM, entries, PublishOptions::replace()).unwrap();
    let snapshot = writer.snapshot(REALM).unwrap();
    (writer, snapshot)
}

fn run(filter: Value) -> Result<Vec<String>, QueryError> {
    let (_writer, snapshot) = fixture();
    let query: Query = serde_json::from_value(json!({ "filter": filter })).unwrap();
    QueryEngine::new(snapshot).search(&query).map(|r| r.ids())
}

fn on_book() -> Value {
    json!({"module": "http://r/book", "name": "Book"})
}

#[test]
fn test_eq_through_link() {
    let ids = run(json!({"on": on_book(), "eq": {"author.lastName": "Abdel-Rahman"}})).unwrap();
    assert_eq!(ids, vec!["http://r/Book/1", "http://r/Book/4"]);
}

#[test]
fn test_eq_null_matches_absent() {
    let ids = run(json!({"on": on_book(), "eq": {"author.lastName": null}})).unwrap();
    assert_eq!(ids, vec!["http://r/Book/3", "http://r/Book/5"]);

    let ids = run(json!({"on": on_book(), "eq": {"editions": null}})).unwrap();
    assert_eq!(ids, vec!["http://r/Book/4"]);
}

#[test]
fn test_eq_implicit_and_and_plural_fan_out() {
    let ids = run(json!({"on": on_book(), "eq": {"editions": 3, "status": "draft"}})).unwrap();
    assert_eq!(ids, vec!["http://r/Book/2"]);

    let ids = run(json!({"on": on_book(), "eq": {"tags": "calm"}})).unwrap();
    assert_eq!(ids, vec!["http://r/Book/3"]);

    let ids = run(json!({"on": on_book(), "eq": {"tags": null}})).unwrap();
    assert_eq!(ids, vec!["http://r/Book/2", "http://r/Book/4", "http://r/Book/5"]);
}

#[test]
fn test_eq_outside_ordinal_list_is_exact() {
    let writer = IndexWriter::temporary().unwrap();
    let entries = vec![
        module_entry("http://r/person.gts", person_module()),
        module_entry("http://r/book.gts", book_module()),
        book(8, json!({"title": "Old", "status": "archived"}), false),
        book(9, json!({"title": "Gone", "status": "retired"}), false),
        book(10, json!({"title": "New", "status": "draft"}), false),
    ];
    writer.publish(REALM, entries, PublishOptions::replace()).unwrap();
    let engine = QueryEngine::new(writer.snapshot(REALM).unwrap());
    let search = |filter: Value| {
        let query: Query = serde_json::from_value(json!({ "filter": filter })).unwrap();
        engine.search(&query).unwrap().ids()
    };

    assert!(search(json!({"on": on_book(), "eq": {"status": "no-such-status"}})).is_empty());
    assert_eq!(
        search(json!({"on": on_book(), "eq": {"status": "archived"}})),
        vec!["http://r/Book/8"]
    );
    assert_eq!(
        search(json!({"on": on_book(), "eq": {"status": "draft"}})),
        vec!["http://r/Book/10"]
    );
}

#[test]
fn test_range_uses_queryable_transform() {
    let ids = run(json!({"on": on_book(), "range": {"status": {"gt": "draft"}}})).unwrap();
    assert_eq!(ids, vec!["http://r/Book/1", "http://r/Book/3", "http://r/Book/4"]);

    let ids = run(json!({"on": on_book(), "range": {"editions": {"gte": 2, "lt": 4}}})).unwrap();
    assert_eq!(ids, vec!["http://r/Book/1", "http://r/Book/2", "http://r/Book/5"]);
}

#[test]
fn test_boolean_combinators_and_type() {
    let ids = run(json!({
        "on": on_book(),
        "any": [
            {"eq": {"status": "draft"}},
            {"type": {"module": "http://r/book", "name": "FancyBook"}}
        ]
    }))
    .unwrap();
    assert_eq!(ids, vec!["http://r/Book/2", "http://r/Book/4"]);

    let ids = run(json!({
        "every": [
            {"type": {"module": "http://r/book", "name": "Book"}},
            {"not": {"on": on_book(), "eq": {"editions": 3}}}
        ]
    }))
    .unwrap();
    assert_eq!(ids, vec!["http://r/Book/3", "http://r/Book/4"]);

    let ids = run(json!({"type": {"module": "http://r/person", "name": "Person"}})).unwrap();
    assert_eq!(ids, vec!["http://r/Person/mango"]);
}

#[test]
fn test_contains_is_case_insensitive() {
    let ids = run(json!({"on": on_book(), "contains": {"title": "MANGO"}})).unwrap();
    assert_eq!(ids, vec!["http://r/Book/1"]);
}

#[test]
fn test_unknown_type_and_field_are_errors() {
    let err = run(json!({"on": {"module": "http://r/nope", "name": "Nope"}, "eq": {"title": "x"}}))
        .unwrap_err();
    assert!(matches!(err, QueryError::UnknownType { ref card, .. } if card == "http://r/nope/Nope"));

    let err = run(json!({"on": on_book(), "eq": {"author.shoeSize": 9}})).unwrap_err();
    assert_eq!(
        err,
        QueryError::UnknownField {
            card: "http://r/book/Book".into(),
            path: "author.shoeSize".into(),
        }
    );

    // Without `on`, only base card fields are known.
    let err = run(json!({"eq": {"editions": 3}})).unwrap_err();
    assert!(err.to_string().contains("editions"));
}

#[test]
fn test_sort_desc_then_asc_with_nulls_last() {
    let (_writer, snapshot) = fixture();
    let query = Query::default()
        .with_filter(Filter::Type(TypeFilter {
            on: None,
            card_type: book_ref(),
        }))
        .sorted_by("editions", Some(book_ref()), Direction::Desc)
        .sorted_by("author.lastName", Some(book_ref()), Direction::Asc);
    let engine = QueryEngine::new(snapshot);
    let result = engine.search(&query).unwrap();
    assert_eq!(
        result.ids(),
        vec![
            "http://r/Book/1",
            "http://r/Book/2",
            "http://r/Book/5",
            "http://r/Book/3",
            "http://r/Book/4",
        ]
    );
    // Same query, same answer.
    assert_eq!(engine.search(&query).unwrap().ids(), result.ids());
}

#[test]
fn test_plural_sort_is_rejected() {
    let (_writer, snapshot) = fixture();
    let query = Query::default().sorted_by("tags", Some(book_ref()), Direction::Asc);
    let err = QueryEngine::new(snapshot).search(&query).unwrap_err();
    assert_eq!(err, QueryError::PluralSort { path: "tags".into() });
}

#[test]
fn test_pagination_reports_total() {
    let (writer, _snapshot) = fixture();
    let query = Query::from_json(
        r#"{
            "filter": {"type": {"module": "http://r/book", "name": "Book"}},
            "page": {"number": 1, "size": 2}
        }"#,
    )
    .unwrap();
    let result = writer.query(REALM, &query).unwrap();
    assert_eq!(result.total, 5);
    assert_eq!(result.ids(), vec!["http://r/Book/3", "http://r/Book/4"]);
    assert_eq!(result.to_document()["meta"]["page"]["total"], 5);
}

#[test]
fn test_card_urls_allow_list() {
    let (writer, _snapshot) = fixture();
    let query = Query {
        card_urls: Some(vec!["http://r/Book/2".into(), "http://r/Book/3.json".into()]),
        ..Default::default()
    };
    let result = writer.query(REALM, &query).unwrap();
    assert_eq!(result.ids(), vec!["http://r/Book/2", "http://r/Book/3"]);
}

#[test]
fn test_card_with_links_includes_cycle() {
    let (writer, _snapshot) = fixture();
    let result = writer
        .card("http://r/Book/1", CardOptions { load_links: true })
        .unwrap();
    let CardResult::Doc { doc } = result else {
        panic!("expected a doc");
    };
    let included: Vec<&str> = doc["included"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(included, vec!["http://r/Person/mango", "http://r/Book/1"]);

    let plain = writer.card("http://r/Book/1.json", CardOptions::default()).unwrap();
    let CardResult::Doc { doc } = plain else {
        panic!("expected a doc");
    };
    assert!(doc.get("included").is_none());

    assert!(writer.card("http://r/Book/99", CardOptions::default()).is_none());
    assert!(writer.card("http://r/book.gts", CardOptions::default()).is_none());
}
