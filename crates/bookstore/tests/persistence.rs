mod common;

use common::*;
use folio_bookstore::{link, unlink, Author, Book, Customer, Order, OrderStatus, Review, ReviewState};
use folio_orm::{
    transaction, Associations, BatchOptions, CrudOperations, DatabasePool, DatabaseValue,
    LockMode, Locking, Model, ModelError, QueryMethods,
};

#[tokio::test]
async fn test_round_trip_preserves_attributes() {
    let pool = setup().await;
    let catalog = seed_catalog(&pool).await;

    let stored = Book::find_or_fail(&pool, catalog.rare_folio.id().unwrap())
        .await
        .unwrap();
    assert_eq!(stored.title().unwrap(), "Rare Folio");
    assert_eq!(stored.year_published().unwrap(), years_ago(10));
    assert!(stored.is_out_of_print().unwrap());
    assert_eq!(stored.price().unwrap(), 800.0);
    assert_eq!(stored.isbn().unwrap(), None);
    assert_eq!(stored.author_id().unwrap(), catalog.alice.id());
    assert_eq!(
        stored.as_record().to_json(),
        catalog.rare_folio.as_record().to_json()
    );
}

#[tokio::test]
async fn test_partial_projection_guards_unloaded_attributes() {
    let pool = setup().await;
    seed_catalog(&pool).await;

    let books = Book::query()
        .select(&["title"])
        .order_by("title")
        .load(&pool)
        .await
        .unwrap();
    let first = &books[0];
    assert_eq!(first.title().unwrap(), "Collector Edition");
    assert!(first.id().is_some());
    assert!(matches!(
        first.price(),
        Err(ModelError::AttributeNotLoaded { ref attribute, .. }) if attribute == "price"
    ));

    let reselected = Book::query()
        .select(&["title", "price"])
        .reselect(&["title"])
        .where_eq("title", "Rare Folio")
        .take_or_fail(&pool)
        .await
        .unwrap();
    assert_eq!(reselected.title().unwrap(), "Rare Folio");
    assert!(matches!(
        reselected.price(),
        Err(ModelError::AttributeNotLoaded { ref attribute, .. }) if attribute == "price"
    ));
}

#[tokio::test]
async fn test_partial_projection_without_lock_column_refuses_save() {
    let pool = setup().await;
    let mut dana = customer(&pool, "Dana", None).await;
    let id = dana.id().unwrap();
    dana.set_attribute("visits", 1).unwrap();
    dana.save(&pool).await.unwrap();
    assert_eq!(dana.lock_version().unwrap(), 1);

    let mut partial = Customer::query()
        .select(&["name"])
        .find_or_fail(&pool, id)
        .await
        .unwrap();
    partial.set_attribute("name", "Dana Renamed").unwrap();
    let before = statements(&pool);
    match partial.save(&pool).await {
        Err(ModelError::AttributeNotLoaded { entity, attribute }) => {
            assert_eq!(entity, "Customer");
            assert_eq!(attribute, "lock_version");
        }
        other => panic!("expected the lock column to be reported unloaded, got {:?}", other),
    }
    assert_eq!(statements(&pool), before);

    let stored = Customer::find_or_fail(&pool, id).await.unwrap();
    assert_eq!(stored.name().unwrap(), "Dana");
    assert_eq!(stored.lock_version().unwrap(), 1);

    let mut versioned = Customer::query()
        .select(&["name", "lock_version"])
        .find_or_fail(&pool, id)
        .await
        .unwrap();
    versioned.set_attribute("name", "Dana Renamed").unwrap();
    versioned.save(&pool).await.unwrap();
    assert_eq!(versioned.lock_version().unwrap(), 2);
}

#[tokio::test]
async fn test_optimistic_lock_rejects_stale_writer() {
    let pool = setup().await;
    let created = customer(&pool, "Dana", Some(1)).await;
    let id = created.id().unwrap();
    let original = created.lock_version().unwrap();

    let mut first = Customer::find_or_fail(&pool, id).await.unwrap();
    let mut second = Customer::find_or_fail(&pool, id).await.unwrap();

    first.set_attribute("name", "Dana First").unwrap();
    first.save(&pool).await.unwrap();
    assert_eq!(first.lock_version().unwrap(), original + 1);

    second.set_attribute("name", "Dana Second").unwrap();
    let stale = second.save(&pool).await;
    match stale {
        Err(ModelError::StaleWrite { table, expected, .. }) => {
            assert_eq!(table, "customers");
            assert_eq!(expected, original);
        }
        other => panic!("expected a stale write, got {:?}", other),
    }
    assert_eq!(second.lock_version().unwrap(), original);

    let mut current = Customer::find_or_fail(&pool, id).await.unwrap();
    assert_eq!(current.name().unwrap(), "Dana First");
    assert_eq!(current.lock_version().unwrap(), original + 1);

    let destroy_stale = second.destroy(&pool).await;
    assert!(destroy_stale.unwrap_err().is_stale_write());

    second.reload(&pool).await.unwrap();
    second.set_attribute("visits", 2).unwrap();
    second.save(&pool).await.unwrap();
    current.reload(&pool).await.unwrap();
    assert_eq!(current.lock_version().unwrap(), original + 2);
    assert_eq!(current.visits().unwrap(), Some(2));
}

#[tokio::test]
async fn test_deprecated_lock_column_alias() {
    let pool = setup().await;
    let dana = customer(&pool, "Dana", None).await;

    let by_alias: i64 = dana.attribute("lock_customer_column").unwrap();
    assert_eq!(by_alias, dana.lock_version().unwrap());

    let found = Customer::query()
        .where_eq("lock_customer_column", 0)
        .count(&pool)
        .await
        .unwrap();
    assert_eq!(found, 1);
}

#[tokio::test]
async fn test_validation_failure_issues_no_statement() {
    let pool = setup().await;
    let before = statements(&pool);

    let result = Review::create(&pool, &[("rating", 4.into())]).await;
    match result {
        Err(ModelError::Validation(errors)) => {
            assert_eq!(errors.on("content"), ["can't be blank".to_string()]);
            assert!(errors.on("rating").is_empty());
        }
        other => panic!("expected validation errors, got {:?}", other),
    }

    let blank = Author::create(&pool, &[("name", "   ".into())]).await;
    assert!(matches!(blank, Err(ModelError::Validation(_))));
    assert_eq!(statements(&pool), before);
}

#[tokio::test]
async fn test_enum_transition_reports_validation_as_false() {
    let pool = setup().await;
    let catalog = seed_catalog(&pool).await;
    let reader = customer(&pool, "Reader", None).await;
    let mut review = Review::create(
        &pool,
        &[
            ("rating", 3.into()),
            ("content", "Fine".into()),
            ("book_id", id_of(&catalog.recent_cheap)),
            ("customer_id", id_of(&reader)),
        ],
    )
    .await
    .unwrap();
    assert_eq!(review.state().unwrap(), ReviewState::NotReviewed);

    assert!(review.is_not_reviewed().unwrap());
    assert!(review.hide(&pool).await.unwrap());
    assert!(review.is_hidden().unwrap());
    assert!(review.mark_not_reviewed(&pool).await.unwrap());
    assert!(review.publish(&pool).await.unwrap());
    assert!(review.is_published().unwrap());

    review.set_attribute("content", "").unwrap();
    assert!(!review.transition_to(&pool, ReviewState::Hidden).await.unwrap());

    let stored = Review::find_or_fail(&pool, review.id().unwrap()).await.unwrap();
    assert_eq!(stored.state().unwrap(), ReviewState::Published);
    assert_eq!(stored.content().unwrap(), "Fine");
}

#[tokio::test]
async fn test_readonly_records_refuse_writes() {
    let pool = setup().await;
    seed_catalog(&pool).await;

    let mut book = Book::query()
        .readonly()
        .where_eq("title", "Recent Cheap")
        .take_or_fail(&pool)
        .await
        .unwrap();
    assert!(book.is_readonly());

    book.set_attribute("price", 25.0).unwrap();
    assert!(matches!(book.save(&pool).await, Err(ModelError::ReadOnlyRecord(_))));
    assert!(matches!(book.destroy(&pool).await, Err(ModelError::ReadOnlyRecord(_))));

    let author = book.author(&pool).await.unwrap().unwrap();
    assert!(author.is_readonly());

    let stored = Book::find_by_or_fail(&pool, "title", "Recent Cheap").await.unwrap();
    assert_eq!(stored.price().unwrap(), 20.0);
    assert!(!stored.is_readonly());
}

#[tokio::test]
async fn test_strict_loading_rejects_lazy_access() {
    let pool = setup().await;
    seed_catalog(&pool).await;

    let authors = Author::query()
        .strict_loading()
        .order_by("name")
        .load(&pool)
        .await
        .unwrap();
    let lazy = authors[0].books(&pool).await;
    match lazy {
        Err(ModelError::LazyLoadViolation { entity, association }) => {
            assert_eq!(entity, "Author");
            assert_eq!(association, "books");
        }
        other => panic!("expected a lazy load violation, got {:?}", other),
    }

    let preloaded = Author::query()
        .strict_loading()
        .preload("books")
        .order_by("name")
        .load(&pool)
        .await
        .unwrap();
    assert_eq!(preloaded[0].books(&pool).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_lazy_associations() {
    let pool = setup().await;
    let catalog = seed_catalog(&pool).await;

    let books = catalog.alice.books(&pool).await.unwrap();
    assert_eq!(
        titles(&books),
        vec!["Recent Cheap", "Collector Edition", "Rare Folio"]
    );

    let author = catalog.worn_paperback.author(&pool).await.unwrap().unwrap();
    assert_eq!(author.id(), catalog.boris.id());

    let mut authors = catalog.supplier.authors(&pool).await.unwrap();
    authors.sort_by_key(|a| a.id());
    let names: Vec<String> = authors.iter().map(|a| a.name().unwrap()).collect();
    assert_eq!(names, vec!["Alice Archer", "Boris Blake"]);

    let supplied = catalog.supplier.books(&pool).await.unwrap();
    assert_eq!(supplied.len(), 4);

    let unsaved = Author::build().unwrap();
    assert!(unsaved.books(&pool).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_many_to_many_links() {
    let pool = setup().await;
    let catalog = seed_catalog(&pool).await;
    let buyer = customer(&pool, "Buyer", None).await;
    let order = Order::create(
        &pool,
        &[("customer_id", id_of(&buyer)), ("total", 820.0.into())],
    )
    .await
    .unwrap();
    assert!(order.is_being_packed().unwrap());

    link(&pool, &catalog.recent_cheap, &order).await.unwrap();
    link(&pool, &catalog.rare_folio, &order).await.unwrap();

    let mut books = order.books(&pool).await.unwrap();
    books.sort_by_key(|b| b.id());
    assert_eq!(titles(&books), vec!["Recent Cheap", "Rare Folio"]);

    let orders = catalog.rare_folio.orders(&pool).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].customer(&pool).await.unwrap().unwrap().id(), buyer.id());

    let with_books = Order::query()
        .includes("books")
        .load(&pool)
        .await
        .unwrap();
    let loaded: Vec<Book> = with_books[0].loaded("books").unwrap();
    assert_eq!(loaded.len(), 2);

    assert!(unlink(&pool, &catalog.recent_cheap, &order).await.unwrap());
    assert!(!unlink(&pool, &catalog.recent_cheap, &order).await.unwrap());
    assert_eq!(order.books(&pool).await.unwrap().len(), 1);

    let unsaved = Book::build().unwrap();
    assert!(matches!(
        link(&pool, &unsaved, &order).await,
        Err(ModelError::MissingPrimaryKey)
    ));
}

#[tokio::test]
async fn test_find_or_create_and_initialize() {
    let pool = setup().await;

    let created = Author::find_or_create_by(&pool, &[("name", "Eli Eastwood".into())])
        .await
        .unwrap();
    let found = Author::find_or_create_by(&pool, &[("name", "Eli Eastwood".into())])
        .await
        .unwrap();
    assert_eq!(created.id(), found.id());
    assert_eq!(Author::query().count(&pool).await.unwrap(), 1);

    let fresh = Author::find_or_initialize_by(&pool, &[("name", "Fay Finch".into())])
        .await
        .unwrap();
    assert!(!fresh.is_persisted());
    assert_eq!(fresh.name().unwrap(), "Fay Finch");
}

#[tokio::test]
async fn test_batches_walk_every_row_once() {
    let pool = setup().await;
    seed_catalog(&pool).await;
    Book::create(
        &pool,
        &[("title", "Fresh Print".into()), ("year_published", years_ago(0).into())],
    )
    .await
    .unwrap();

    let mut batches = Book::query()
        .batches(BatchOptions::default().batch_size(2))
        .unwrap();
    let mut sizes = Vec::new();
    let mut seen = Vec::new();
    while let Some(batch) = batches.next_batch(&pool).await.unwrap() {
        sizes.push(batch.len());
        seen.extend(batch.iter().filter_map(|b| b.id()));
    }
    assert_eq!(sizes, vec![2, 2, 1]);
    let mut sorted = seen.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted, seen);
    assert_eq!(seen, Book::query().order_by("id").ids(&pool).await.unwrap());

    batches.reset();
    let first = batches.next_record(&pool).await.unwrap().unwrap();
    assert_eq!(first.id(), seen.first().copied());

    let mut capped = Book::query()
        .limit(3)
        .batches(BatchOptions::default().batch_size(2).descending())
        .unwrap();
    let mut delivered = Vec::new();
    while let Some(book) = capped.next_record(&pool).await.unwrap() {
        delivered.push(book.id().unwrap());
    }
    let mut newest_first = seen.clone();
    newest_first.reverse();
    newest_first.truncate(3);
    assert_eq!(delivered, newest_first);

    let ordered = Book::query()
        .order_by("title")
        .batches(BatchOptions::default().error_on_ignored_order(true));
    assert!(matches!(ordered, Err(ModelError::InvalidQuery(_))));
}

#[tokio::test]
async fn test_batches_over_partial_projections() {
    let pool = setup().await;
    seed_catalog(&pool).await;

    let mut titled = Book::query()
        .select(&["title"])
        .batches(BatchOptions::default().batch_size(2))
        .unwrap();
    let mut sizes = Vec::new();
    while let Some(batch) = titled.next_batch(&pool).await.unwrap() {
        assert!(batch.iter().all(|book| book.id().is_some()));
        sizes.push(batch.len());
    }
    assert_eq!(sizes, vec![2, 2]);

    let distinct = Book::query()
        .select(&["title"])
        .distinct(true)
        .batches(BatchOptions::default().batch_size(2));
    assert!(matches!(distinct, Err(ModelError::InvalidQuery(_))));
}

#[tokio::test]
async fn test_with_lock_rolls_back_on_error() {
    let pool = setup().await;
    let mut dana = customer(&pool, "Dana", Some(1)).await;
    let before = pool.statistics();
    let rollbacks = before.rollbacks();

    let outcome: Result<(), ModelError> = dana
        .with_lock(&pool, |tx, locked| {
            Box::pin(async move {
                locked.set_attribute("visits", 50)?;
                locked.save(tx).await?;
                Err::<(), _>(ModelError::invalid_query("abandon the visit count"))
            })
        })
        .await;
    assert!(matches!(outcome, Err(ModelError::InvalidQuery(_))));
    assert_eq!(pool.statistics().rollbacks(), rollbacks + 1);

    let stored = Customer::find_or_fail(&pool, dana.id().unwrap()).await.unwrap();
    assert_eq!(stored.visits().unwrap(), Some(1));
}

#[tokio::test]
async fn test_with_lock_commits_on_success() {
    let pool = setup().await;
    let mut dana = customer(&pool, "Dana", Some(1)).await;
    let commits = pool.statistics().commits();

    let visits = dana
        .with_lock(&pool, |tx, locked| {
            Box::pin(async move {
                let next = locked.visits()?.unwrap_or(0) + 1;
                locked.set_attribute("visits", next)?;
                locked.save(tx).await?;
                Ok::<_, ModelError>(next)
            })
        })
        .await
        .unwrap();
    assert_eq!(visits, 2);
    assert_eq!(pool.statistics().commits(), commits + 1);

    let stored = Customer::find_or_fail(&pool, dana.id().unwrap()).await.unwrap();
    assert_eq!(stored.visits().unwrap(), Some(2));
    assert_eq!(stored.lock_version().unwrap(), 1);
}

#[tokio::test]
async fn test_locked_relation_requires_transaction() {
    let pool = setup().await;
    seed_catalog(&pool).await;

    let outside = Book::query().lock(LockMode::ForUpdate).load(&pool).await;
    assert!(matches!(outside, Err(ModelError::Transaction(_))));

    let mut dana = customer(&pool, "Dana", None).await;
    assert!(matches!(dana.lock_in(&pool).await, Err(ModelError::Transaction(_))));

    let inside = transaction(&pool, |tx| {
        Box::pin(async move {
            let locked = Book::query().lock(LockMode::ForUpdate).load(tx).await?;
            Ok::<_, ModelError>(locked.len())
        })
    })
    .await
    .unwrap();
    assert_eq!(inside, 4);
}

#[tokio::test]
async fn test_transaction_commits_and_rolls_back() {
    let pool = setup().await;

    transaction(&pool, |tx| {
        Box::pin(async move {
            Author::create(tx, &[("name", "Kept".into())]).await?;
            Ok::<_, ModelError>(())
        })
    })
    .await
    .unwrap();

    let failed: Result<(), ModelError> = transaction(&pool, |tx| {
        Box::pin(async move {
            Author::create(tx, &[("name", "Discarded".into())]).await?;
            Err::<(), _>(ModelError::NotFound("nothing to see".to_string()))
        })
    })
    .await;
    assert!(failed.unwrap_err().is_not_found());

    let names = Author::query()
        .pluck_column::<String, _>(&pool, "name")
        .await
        .unwrap();
    assert_eq!(names, vec!["Kept"]);
}

#[tokio::test]
async fn test_destroy_and_enum_shortcuts() {
    let pool = setup().await;
    let mut order = Order::create(&pool, &[("total", 12.5.into())]).await.unwrap();

    assert!(order.pack(&pool).await.unwrap());
    assert!(order.is_being_packed().unwrap());
    assert!(order.ship(&pool).await.unwrap());
    assert_eq!(
        Order::with_status(OrderStatus::Shipped).ids(&pool).await.unwrap(),
        vec![order.id().unwrap()]
    );
    let totals: Vec<DatabaseValue> = Order::query()
        .pluck(&pool, &["total"])
        .await
        .unwrap()
        .into_iter()
        .flatten()
        .collect();
    assert_eq!(totals, vec![DatabaseValue::Float64(12.5)]);

    order.destroy(&pool).await.unwrap();
    assert!(!order.is_persisted());
    assert!(Order::find(&pool, 1).await.unwrap().is_none());
    assert!(matches!(
        order.reload(&pool).await,
        Err(ModelError::NotFound(_))
    ));
}
