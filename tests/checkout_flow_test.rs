mod common;

use assert_matches::assert_matches;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use uuid::Uuid;

use common::{line, order_input, TestApp};
use homeware_api::{
    auth::AuthSession,
    entities::{customer, order, order_item, product},
    errors::ServiceError,
};

#[tokio::test]
async fn checkout_decrements_stock_and_snapshots_prices() {
    let app = TestApp::new().await;
    let tray = app.seed_product("SKU-TRAY", "Teak Tray", 45_000, 10).await;
    let bowl = app.seed_product("SKU-BOWL", "Ceramic Bowl", 20_000, 4).await;

    let response = app
        .services
        .checkout
        .create_order(
            &AuthSession::guest(),
            order_input("0912345678", vec![line(tray.id, 2), line(bowl.id, 3)]),
        )
        .await
        .expect("checkout should succeed");

    let saved = order::Entity::find_by_id(response.order_id)
        .one(&*app.db)
        .await
        .unwrap()
        .expect("order persisted");
    assert_eq!(saved.status, order::OrderStatus::Pending);
    assert_eq!(saved.total, 2 * 45_000 + 3 * 20_000);
    assert_eq!(saved.shipping_phone, "0912345678");

    let items = order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(saved.id))
        .all(&*app.db)
        .await
        .unwrap();
    assert_eq!(items.len(), 2);
    let computed: i64 = items.iter().map(|i| i.price * i64::from(i.quantity)).sum();
    assert_eq!(saved.total, computed);

    let tray_after = product::Entity::find_by_id(tray.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    let bowl_after = product::Entity::find_by_id(bowl.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tray_after.stock, 8);
    assert_eq!(bowl_after.stock, 1);
}

#[tokio::test]
async fn order_total_survives_later_price_changes() {
    let app = TestApp::new().await;
    let tray = app.seed_product("SKU-TRAY", "Teak Tray", 45_000, 10).await;

    let response = app
        .services
        .checkout
        .create_order(
            &AuthSession::guest(),
            order_input("0912345678", vec![line(tray.id, 1)]),
        )
        .await
        .unwrap();

    // Double the product price after the order was placed
    let mut active: product::ActiveModel = product::Entity::find_by_id(tray.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap()
        .into();
    active.price = Set(90_000);
    active.update(&*app.db).await.unwrap();

    let saved = order::Entity::find_by_id(response.order_id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.total, 45_000);

    let items = order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(saved.id))
        .all(&*app.db)
        .await
        .unwrap();
    assert_eq!(items[0].price, 45_000);
}

#[tokio::test]
async fn out_of_stock_and_low_stock_produce_distinct_messages() {
    let app = TestApp::new().await;
    let gone = app.seed_product("SKU-GONE", "Linen Napkin", 5_000, 0).await;
    let low = app.seed_product("SKU-LOW", "Oak Coaster", 8_000, 2).await;

    let err = app
        .services
        .checkout
        .create_order(
            &AuthSession::guest(),
            order_input("0912345678", vec![line(gone.id, 1)]),
        )
        .await
        .unwrap_err();
    assert_matches!(&err, ServiceError::InsufficientStock(msg) if msg.contains("Linen Napkin") && msg.contains("out of stock"));

    let err = app
        .services
        .checkout
        .create_order(
            &AuthSession::guest(),
            order_input("0912345678", vec![line(low.id, 5)]),
        )
        .await
        .unwrap_err();
    assert_matches!(&err, ServiceError::InsufficientStock(msg) if msg.contains("Oak Coaster") && msg.contains("Only 2 left"));

    // Failed checkouts must not touch stock
    let low_after = product::Entity::find_by_id(low.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(low_after.stock, 2);
}

#[tokio::test]
async fn unknown_or_inactive_products_fail_whole_checkout() {
    let app = TestApp::new().await;
    let tray = app.seed_product("SKU-TRAY", "Teak Tray", 45_000, 10).await;
    let hidden = app.seed_inactive_product("SKU-HIDDEN", 10_000, 10).await;

    let err = app
        .services
        .checkout
        .create_order(
            &AuthSession::guest(),
            order_input("0912345678", vec![line(tray.id, 1), line(Uuid::new_v4(), 1)]),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidInput(msg) if msg.contains("unavailable"));

    let err = app
        .services
        .checkout
        .create_order(
            &AuthSession::guest(),
            order_input("0912345678", vec![line(hidden.id, 1)]),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InvalidInput(_));

    // Nothing was reserved for the partially-valid cart
    let tray_after = product::Entity::find_by_id(tray.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tray_after.stock, 10);
}

#[tokio::test]
async fn invalid_input_is_rejected_before_any_lookup() {
    let app = TestApp::new().await;
    let tray = app.seed_product("SKU-TRAY", "Teak Tray", 45_000, 10).await;

    let bad_phone = order_input("12345", vec![line(tray.id, 1)]);
    let err = app
        .services
        .checkout
        .create_order(&AuthSession::guest(), bad_phone)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));

    let empty_cart = order_input("0912345678", vec![]);
    let err = app
        .services
        .checkout
        .create_order(&AuthSession::guest(), empty_cart)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(msg) if msg.contains("at least one item"));

    let zero_quantity = order_input("0912345678", vec![line(tray.id, 0)]);
    let err = app
        .services
        .checkout
        .create_order(&AuthSession::guest(), zero_quantity)
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(msg) if msg.contains("Quantity"));
}

#[tokio::test]
async fn guest_checkout_creates_unlinked_customer() {
    let app = TestApp::new().await;
    let tray = app.seed_product("SKU-TRAY", "Teak Tray", 45_000, 10).await;

    app.services
        .checkout
        .create_order(
            &AuthSession::guest(),
            order_input("0912345678", vec![line(tray.id, 1)]),
        )
        .await
        .unwrap();

    let saved = customer::Entity::find()
        .filter(customer::Column::Phone.eq("0912345678"))
        .one(&*app.db)
        .await
        .unwrap()
        .expect("customer created");
    assert_eq!(saved.user_id, None);
    assert_eq!(saved.name, "An Nguyen");
}

#[tokio::test]
async fn phone_match_links_unlinked_customer_to_caller() {
    let app = TestApp::new().await;
    let tray = app.seed_product("SKU-TRAY", "Teak Tray", 45_000, 10).await;

    // Guest checkout first creates an unlinked record
    app.services
        .checkout
        .create_order(
            &AuthSession::guest(),
            order_input("0912345678", vec![line(tray.id, 1)]),
        )
        .await
        .unwrap();

    // Same phone, now authenticated as U1
    app.services
        .checkout
        .create_order(
            &TestApp::user_session("U1"),
            order_input("0912345678", vec![line(tray.id, 1)]),
        )
        .await
        .unwrap();

    let customers = customer::Entity::find().all(&*app.db).await.unwrap();
    assert_eq!(customers.len(), 1, "reconciliation must not duplicate");
    assert_eq!(customers[0].user_id.as_deref(), Some("U1"));
}

#[tokio::test]
async fn phone_match_never_overwrites_existing_link() {
    let app = TestApp::new().await;
    let tray = app.seed_product("SKU-TRAY", "Teak Tray", 45_000, 10).await;

    app.services
        .checkout
        .create_order(
            &TestApp::user_session("U2"),
            order_input("0912345678", vec![line(tray.id, 1)]),
        )
        .await
        .unwrap();

    // A different authenticated user checks out with the same phone;
    // the order succeeds but the original linkage stays untouched.
    app.services
        .checkout
        .create_order(
            &TestApp::user_session("U3"),
            order_input("0912345678", vec![line(tray.id, 1)]),
        )
        .await
        .unwrap();

    let customers = customer::Entity::find().all(&*app.db).await.unwrap();
    assert_eq!(customers.len(), 1);
    assert_eq!(customers[0].user_id.as_deref(), Some("U2"));
}

#[tokio::test]
async fn repeated_checkout_by_same_account_is_idempotent() {
    let app = TestApp::new().await;
    let tray = app.seed_product("SKU-TRAY", "Teak Tray", 45_000, 10).await;

    for _ in 0..2 {
        app.services
            .checkout
            .create_order(
                &TestApp::user_session("U1"),
                order_input("0912345678", vec![line(tray.id, 1)]),
            )
            .await
            .unwrap();
    }

    let customers = customer::Entity::find().all(&*app.db).await.unwrap();
    assert_eq!(customers.len(), 1);
    assert_eq!(customers[0].user_id.as_deref(), Some("U1"));
}

#[tokio::test]
async fn account_match_takes_new_phone_when_free() {
    let app = TestApp::new().await;
    let tray = app.seed_product("SKU-TRAY", "Teak Tray", 45_000, 10).await;

    app.services
        .checkout
        .create_order(
            &TestApp::user_session("U1"),
            order_input("0912345678", vec![line(tray.id, 1)]),
        )
        .await
        .unwrap();

    // Same account, new phone: the record moves to the new number
    app.services
        .checkout
        .create_order(
            &TestApp::user_session("U1"),
            order_input("0987654321", vec![line(tray.id, 1)]),
        )
        .await
        .unwrap();

    let customers = customer::Entity::find().all(&*app.db).await.unwrap();
    assert_eq!(customers.len(), 1);
    assert_eq!(customers[0].phone, "0987654321");
}

#[tokio::test]
async fn account_match_fails_when_new_phone_belongs_to_someone_else() {
    let app = TestApp::new().await;
    let tray = app.seed_product("SKU-TRAY", "Teak Tray", 45_000, 10).await;

    // U1's record on one phone, U2's record on another
    app.services
        .checkout
        .create_order(
            &TestApp::user_session("U1"),
            order_input("0912345678", vec![line(tray.id, 1)]),
        )
        .await
        .unwrap();
    app.services
        .checkout
        .create_order(
            &TestApp::user_session("U2"),
            order_input("0987654321", vec![line(tray.id, 1)]),
        )
        .await
        .unwrap();

    // U2 tries to take over U1's phone: the whole checkout fails and no
    // stock is consumed.
    let before = product::Entity::find_by_id(tray.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap()
        .stock;
    let err = app
        .services
        .checkout
        .create_order(
            &TestApp::user_session("U2"),
            order_input("0912345678", vec![line(tray.id, 1)]),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::Conflict(msg) if msg.contains("already in use"));

    let after = product::Entity::find_by_id(tray.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap()
        .stock;
    assert_eq!(before, after, "failed checkout must roll back the decrement");
}
