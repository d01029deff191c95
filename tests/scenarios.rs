use anyhow::Context;
use marketplace_ledger::{
    Amount, Category, Decision, IdentityView, Item, MarketConfig, MarketError, MarketService,
    MintRequest, ProfileUpdate, RequestStatus, TxKind,
};
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

// Sled takes a file lock on its directory, so every test gets its own database
// under a temp dir. The TempDir has to outlive the service.
fn fresh_service(starting_balance: i64) -> anyhow::Result<(TempDir, MarketService)> {
    let temp_dir = tempdir()?;
    let db = sled::open(temp_dir.path().join("market.db"))?;
    let config = MarketConfig::default().with_starting_balance(Amount::units(starting_balance));
    let service = MarketService::new(Arc::new(db), config)?;
    Ok((temp_dir, service))
}

fn signup(service: &MarketService, name: &str) -> anyhow::Result<IdentityView> {
    let email = format!("{}@example.com", name.to_lowercase());
    Ok(service.create_identity(name, &email, "secret")?)
}

fn mint_listed(
    service: &MarketService,
    owner: &str,
    name: &str,
    price: i64,
) -> anyhow::Result<Item> {
    let draft = MintRequest::new(owner, Category::Art)
        .set_name(name)
        .set_creator("Studio")
        .add_image("/uploads/art.png")
        .set_price(Amount::units(price))
        .set_for_sale(true);
    Ok(service.mint_item(draft)?)
}

fn balance(service: &MarketService, id: &str) -> anyhow::Result<Amount> {
    Ok(service.get_identity(id)?.balance)
}

#[test]
fn accept_moves_money_and_ownership_together() -> anyhow::Result<()> {
    let (_dir, service) = fresh_service(50)?;

    let alice = signup(&service, "Alice")?;
    let bob = signup(&service, "Bob")?;
    service.top_up(&alice.id, Amount::units(50))?;
    assert_eq!(balance(&service, &alice.id)?, Amount::units(100));

    let item = mint_listed(&service, &alice.id, "Sunset", 10)?;

    let request = service
        .create_trade_request(&item.id, &bob.id)
        .context("Trade request failed on create: ")?;
    assert_eq!(request.status(), RequestStatus::Pending);
    assert_eq!(request.price, Amount::units(10));
    assert_eq!(request.seller_id, alice.id);
    assert_eq!(request.seller_name, "Alice");
    assert_eq!(request.buyer_name, "Bob");
    assert_eq!(request.item_name, "Sunset");
    assert_eq!(request.item_image.as_deref(), Some("/uploads/art.png"));

    let settled = service
        .respond_to_trade_request(&request.id, Decision::Accept)
        .context("Trade request failed on accept: ")?;
    assert_eq!(settled.status(), RequestStatus::Accepted);

    assert_eq!(balance(&service, &alice.id)?, Amount::units(110));
    assert_eq!(balance(&service, &bob.id)?, Amount::units(40));

    let item = service.get_item(&item.id)?;
    assert_eq!(item.owner_id(), bob.id);
    assert!(!item.is_for_sale());
    assert_eq!(item.history().len(), 1);
    assert_eq!(item.history()[0].from_owner_id, alice.id);
    assert_eq!(item.history()[0].to_owner_id, bob.id);
    assert_eq!(item.history()[0].price, Amount::units(10));

    // a second answer on the same request changes nothing
    let err = service
        .respond_to_trade_request(&request.id, Decision::Accept)
        .unwrap_err();
    assert!(matches!(err, MarketError::AlreadyProcessed { .. }));
    assert_eq!(balance(&service, &alice.id)?, Amount::units(110));
    assert_eq!(balance(&service, &bob.id)?, Amount::units(40));
    assert_eq!(service.get_item(&item.id)?.history().len(), 1);

    let log = service.list_transactions()?;
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].kind, TxKind::Sale);
    assert_eq!(log[0].price, Some(Amount::units(10)));
    assert_eq!(log[0].from_id, alice.id);
    assert_eq!(log[0].to_id, bob.id);
    assert_eq!(log[1].kind, TxKind::Mint);
    assert_eq!(log[1].from_id, "SYSTEM");

    Ok(())
}

#[test]
fn second_buyer_cannot_take_an_item_already_sold() -> anyhow::Result<()> {
    let (_dir, service) = fresh_service(100)?;

    let alice = signup(&service, "Alice")?;
    let bob = signup(&service, "Bob")?;
    let carol = signup(&service, "Carol")?;
    let item = mint_listed(&service, &alice.id, "Sunset", 10)?;

    let first = service.create_trade_request(&item.id, &bob.id)?;
    let second = service.create_trade_request(&item.id, &carol.id)?;

    service.respond_to_trade_request(&first.id, Decision::Accept)?;

    let err = service
        .respond_to_trade_request(&second.id, Decision::Accept)
        .unwrap_err();
    assert!(matches!(err, MarketError::DataIntegrity(_)), "got {err:?}");

    let item = service.get_item(&item.id)?;
    assert_eq!(item.owner_id(), bob.id);
    assert_eq!(item.history().len(), 1);
    assert_eq!(balance(&service, &alice.id)?, Amount::units(110));
    assert_eq!(balance(&service, &carol.id)?, Amount::units(100));

    // the losing request is untouched and can still be turned down
    assert_eq!(
        service.get_trade_request(&second.id)?.status(),
        RequestStatus::Pending
    );
    let rejected = service.respond_to_trade_request(&second.id, Decision::Reject)?;
    assert_eq!(rejected.status(), RequestStatus::Rejected);

    Ok(())
}

#[test]
fn accepted_price_is_the_one_frozen_at_request_time() -> anyhow::Result<()> {
    let (_dir, service) = fresh_service(100)?;

    let alice = signup(&service, "Alice")?;
    let bob = signup(&service, "Bob")?;
    let item = mint_listed(&service, &alice.id, "Sunset", 10)?;

    let request = service.create_trade_request(&item.id, &bob.id)?;
    service.update_item_listing(&item.id, Some(Amount::units(30)), None)?;

    service.respond_to_trade_request(&request.id, Decision::Accept)?;

    assert_eq!(balance(&service, &alice.id)?, Amount::units(110));
    assert_eq!(balance(&service, &bob.id)?, Amount::units(90));
    assert_eq!(service.get_item(&item.id)?.history()[0].price, Amount::units(10));

    Ok(())
}

#[test]
fn funds_are_checked_again_on_accept() -> anyhow::Result<()> {
    let (_dir, service) = fresh_service(15)?;

    let alice = signup(&service, "Alice")?;
    let bob = signup(&service, "Bob")?;
    let sunset = mint_listed(&service, &alice.id, "Sunset", 10)?;
    let sunrise = mint_listed(&service, &alice.id, "Sunrise", 10)?;

    let for_sunset = service.create_trade_request(&sunset.id, &bob.id)?;
    let for_sunrise = service.create_trade_request(&sunrise.id, &bob.id)?;

    service.respond_to_trade_request(&for_sunrise.id, Decision::Accept)?;
    assert_eq!(balance(&service, &bob.id)?, Amount::units(5));

    let err = service
        .respond_to_trade_request(&for_sunset.id, Decision::Accept)
        .unwrap_err();
    assert!(matches!(err, MarketError::InsufficientFunds { .. }));

    assert_eq!(balance(&service, &bob.id)?, Amount::units(5));
    assert_eq!(balance(&service, &alice.id)?, Amount::units(25));
    let sunset = service.get_item(&sunset.id)?;
    assert_eq!(sunset.owner_id(), alice.id);
    assert!(sunset.is_for_sale());
    assert!(sunset.history().is_empty());
    assert_eq!(
        service.get_trade_request(&for_sunset.id)?.status(),
        RequestStatus::Pending
    );
    assert_eq!(service.list_transactions()?.len(), 3);

    Ok(())
}

#[test]
fn reject_only_touches_the_request() -> anyhow::Result<()> {
    let (_dir, service) = fresh_service(100)?;

    let alice = signup(&service, "Alice")?;
    let bob = signup(&service, "Bob")?;
    let item = mint_listed(&service, &alice.id, "Sunset", 10)?;
    let request = service.create_trade_request(&item.id, &bob.id)?;

    let rejected = service.respond_to_trade_request(&request.id, Decision::Reject)?;
    assert_eq!(rejected.status(), RequestStatus::Rejected);

    let err = service
        .respond_to_trade_request(&request.id, Decision::Accept)
        .unwrap_err();
    assert!(matches!(err, MarketError::AlreadyProcessed { .. }));

    assert_eq!(balance(&service, &alice.id)?, Amount::units(100));
    assert_eq!(balance(&service, &bob.id)?, Amount::units(100));
    let item = service.get_item(&item.id)?;
    assert_eq!(item.owner_id(), alice.id);
    assert!(item.is_for_sale());
    assert_eq!(service.list_transactions()?.len(), 1);

    Ok(())
}

#[test]
fn request_creation_rules_apply_in_order() -> anyhow::Result<()> {
    let (_dir, service) = fresh_service(5)?;

    let alice = signup(&service, "Alice")?;
    let bob = signup(&service, "Bob")?;
    let listed = mint_listed(&service, &alice.id, "Sunset", 10)?;
    let unlisted = service.mint_item(
        MintRequest::new(&alice.id, Category::Music)
            .set_name("Demo tape")
            .add_image("/uploads/tape.png"),
    )?;

    // missing item wins over a missing buyer
    let err = service.create_trade_request("ZZZZZZ", "user_nobody").unwrap_err();
    assert!(matches!(err, MarketError::NotFound { .. }));

    let err = service.create_trade_request(&unlisted.id, &bob.id).unwrap_err();
    assert!(matches!(err, MarketError::NotListed(_)));

    let err = service.create_trade_request(&listed.id, &alice.id).unwrap_err();
    assert!(matches!(err, MarketError::SelfTrade(_)));

    let err = service.create_trade_request(&listed.id, "user_nobody").unwrap_err();
    assert!(matches!(err, MarketError::NotFound { .. }));

    let err = service.create_trade_request(&listed.id, &bob.id).unwrap_err();
    assert!(matches!(err, MarketError::InsufficientFunds { .. }));

    // nothing was recorded for any refused request
    assert!(service.list_trade_requests(&bob.id)?.is_empty());
    assert!(service.list_trade_requests(&alice.id)?.is_empty());

    Ok(())
}

#[test]
fn identity_items_never_go_on_sale() -> anyhow::Result<()> {
    let (_dir, service) = fresh_service(100)?;
    let alice = signup(&service, "Alice")?;

    let listed_passport = MintRequest::new(&alice.id, Category::Identity)
        .set_name("Passport")
        .add_image("/uploads/passport.png")
        .set_price(Amount::units(10))
        .set_for_sale(true);
    let err = service.mint_item(listed_passport).unwrap_err();
    assert!(matches!(err, MarketError::InvalidListing(_)));

    let passport = service.mint_item(
        MintRequest::new(&alice.id, Category::Identity)
            .set_name("Passport")
            .add_image("/uploads/passport.png"),
    )?;

    let err = service
        .update_item_listing(&passport.id, None, Some(true))
        .unwrap_err();
    assert!(matches!(err, MarketError::InvalidListing(_)));
    assert!(!service.get_item(&passport.id)?.is_for_sale());

    // only the failed mint is missing from the log
    assert_eq!(service.list_transactions()?.len(), 1);

    Ok(())
}

#[test]
fn mint_validation_and_lookup() -> anyhow::Result<()> {
    let (_dir, service) = fresh_service(100)?;
    let alice = signup(&service, "Alice")?;

    let err = service
        .mint_item(MintRequest::new(&alice.id, Category::Art).set_name("No picture"))
        .unwrap_err();
    assert!(matches!(err, MarketError::InvalidMint(_)));

    let err = service
        .mint_item(
            MintRequest::new("user_nobody", Category::Art)
                .set_name("Orphan")
                .add_image("/x.png"),
        )
        .unwrap_err();
    assert!(matches!(err, MarketError::NotFound { .. }));

    let item = mint_listed(&service, &alice.id, "Sunset", 10)?;
    assert_eq!(item.id.len(), 6);
    assert!(item.tx_hash.starts_with("0x"));

    // ids are typed in by hand, so case does not matter
    let found = service.get_item(&item.id.to_lowercase())?;
    assert_eq!(found.id, item.id);

    let provenance = service.item_provenance(&item.id)?;
    assert_eq!(provenance.len(), 1);
    assert_eq!(provenance[0].kind, TxKind::Mint);
    assert_eq!(provenance[0].memo, "Minted ART Asset");

    assert!(matches!(
        service.get_item("NOPE00").unwrap_err(),
        MarketError::NotFound { .. }
    ));

    Ok(())
}

#[test]
fn identity_lifecycle() -> anyhow::Result<()> {
    let (_dir, service) = fresh_service(100)?;

    let alice = service.create_identity("Alice", "alice@example.com", "hunter2")?;
    assert_eq!(alice.balance, Amount::units(100));

    let err = service
        .create_identity("Alice again", "ALICE@example.com", "other")
        .unwrap_err();
    assert!(matches!(err, MarketError::DuplicateIdentity(_)));

    assert_eq!(service.authenticate("alice@example.com", "hunter2")?.id, alice.id);
    assert!(matches!(
        service.authenticate("alice@example.com", "wrong").unwrap_err(),
        MarketError::InvalidCredentials
    ));
    assert!(matches!(
        service.authenticate("nobody@example.com", "hunter2").unwrap_err(),
        MarketError::InvalidCredentials
    ));

    service.update_identity_profile(
        &alice.id,
        ProfileUpdate {
            secret: Some("correct horse".into()),
            avatar_ref: Some("/uploads/alice.png".into()),
        },
    )?;
    let view = service.authenticate("alice@example.com", "correct horse")?;
    assert_eq!(view.profile_image.as_deref(), Some("/uploads/alice.png"));

    assert!(matches!(
        service.top_up(&alice.id, Amount::ZERO).unwrap_err(),
        MarketError::InvalidAmount(_)
    ));
    assert!(matches!(
        service.top_up(&alice.id, Amount::units(-5)).unwrap_err(),
        MarketError::InvalidAmount(_)
    ));
    let topped = service.top_up(&alice.id, "12.5".parse()?)?;
    assert_eq!(topped.balance, "112.5".parse::<Amount>()?);

    let saved = service.toggle_saved("a4f92b", &alice.id)?;
    assert_eq!(saved.saved_item_ids, vec!["A4F92B".to_string()]);
    let unsaved = service.toggle_saved("A4F92B", &alice.id)?;
    assert!(unsaved.saved_item_ids.is_empty());

    assert!(matches!(
        service.toggle_saved("A4F92B", "user_nobody").unwrap_err(),
        MarketError::NotFound { .. }
    ));

    Ok(())
}

#[test]
fn requests_are_listed_newest_first_for_both_sides() -> anyhow::Result<()> {
    let (_dir, service) = fresh_service(100)?;

    let alice = signup(&service, "Alice")?;
    let bob = signup(&service, "Bob")?;
    let carol = signup(&service, "Carol")?;
    let sunset = mint_listed(&service, &alice.id, "Sunset", 10)?;
    let sunrise = mint_listed(&service, &alice.id, "Sunrise", 20)?;

    let first = service.create_trade_request(&sunset.id, &bob.id)?;
    let second = service.create_trade_request(&sunrise.id, &bob.id)?;
    let third = service.create_trade_request(&sunset.id, &carol.id)?;

    let for_alice: Vec<String> = service
        .list_trade_requests(&alice.id)?
        .into_iter()
        .map(|request| request.id)
        .collect();
    assert_eq!(for_alice, vec![third.id.clone(), second.id.clone(), first.id.clone()]);

    let for_bob: Vec<String> = service
        .list_trade_requests(&bob.id)?
        .into_iter()
        .map(|request| request.id)
        .collect();
    assert_eq!(for_bob, vec![second.id, first.id]);

    assert_eq!(service.list_trade_requests(&carol.id)?.len(), 1);

    Ok(())
}

#[test]
fn catalog_query_through_the_service() -> anyhow::Result<()> {
    let (_dir, service) = fresh_service(100)?;
    let alice = signup(&service, "Alice")?;

    let sunset = mint_listed(&service, &alice.id, "Sunset", 10)?;
    let ticket = service.mint_item(
        MintRequest::new(&alice.id, Category::Ticket)
            .set_name("Concert Pass")
            .set_creator("Live Co")
            .add_image("/uploads/ticket.png"),
    )?;

    let newest: Vec<String> = service
        .query_items(None, None, None, None)?
        .into_iter()
        .map(|item| item.id)
        .collect();
    assert_eq!(newest, vec![ticket.id.clone(), sunset.id.clone()]);

    let oldest: Vec<String> = service
        .query_items(None, Some("ALL"), Some("OLDEST"), None)?
        .into_iter()
        .map(|item| item.id)
        .collect();
    assert_eq!(oldest, vec![sunset.id.clone(), ticket.id.clone()]);

    let tickets = service.query_items(None, Some("TICKET"), None, None)?;
    assert_eq!(tickets.len(), 1);
    assert_eq!(tickets[0].id, ticket.id);

    let by_creator = service.query_items(Some("live co"), None, None, None)?;
    assert_eq!(by_creator.len(), 1);

    let today = sunset.metadata.created_at.day().format("%Y-%m-%d").to_string();
    assert_eq!(service.query_items(None, None, None, Some(&today))?.len(), 2);
    assert!(service.query_items(None, None, None, Some("1999-01-01"))?.is_empty());
    assert!(service.query_items(None, Some("SPACESHIP"), None, None)?.is_empty());

    Ok(())
}

#[test]
fn state_survives_reopening_the_store() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let path = temp_dir.path().join("market.db");

    let (alice_id, item_id) = {
        let service = MarketService::open(MarketConfig::default().with_db_path(&path))?;
        let alice = signup(&service, "Alice")?;
        let item = mint_listed(&service, &alice.id, "Sunset", 10)?;
        service.flush()?;
        (alice.id, item.id)
    };

    let service = MarketService::open(MarketConfig::default().with_db_path(&path))?;
    assert_eq!(service.get_item(&item_id)?.owner_id(), alice_id);
    assert_eq!(service.authenticate("alice@example.com", "secret")?.id, alice_id);

    Ok(())
}

#[test]
fn racing_accepts_settle_exactly_once() -> anyhow::Result<()> {
    let (_dir, service) = fresh_service(100)?;

    let alice = signup(&service, "Alice")?;
    let item = mint_listed(&service, &alice.id, "Sunset", 10)?;

    let mut requests = vec![];
    for name in ["Bob", "Carol", "Dave", "Erin", "Frank", "Grace"] {
        let buyer = signup(&service, name)?;
        requests.push(service.create_trade_request(&item.id, &buyer.id)?);
    }

    let outcomes: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = requests
            .iter()
            .map(|request| {
                let service = &service;
                scope.spawn(move || service.respond_to_trade_request(&request.id, Decision::Accept))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("settlement thread panicked"))
            .collect()
    });

    let winners: Vec<_> = outcomes.iter().filter_map(|outcome| outcome.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for outcome in &outcomes {
        if let Err(err) = outcome {
            assert!(matches!(err, MarketError::DataIntegrity(_)), "got {err:?}");
        }
    }

    let item = service.get_item(&item.id)?;
    assert_eq!(item.owner_id(), winners[0].buyer_id);
    assert_eq!(item.history().len(), 1);
    assert_eq!(balance(&service, &alice.id)?, Amount::units(110));
    assert_eq!(balance(&service, &winners[0].buyer_id)?, Amount::units(90));

    Ok(())
}
