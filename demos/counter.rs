//! Counter application: a shared count, a text atom and a memoized double,
//! driven the way a rendering host would drive them.
//!
//! Store events are logged at trace level.

use cellstore::{StateStore, StoreOptions};
use tracing::info;

fn render(store: &StateStore) -> cellstore::Result<()> {
    let count = store.lookup::<i32>("count")?;
    let text = store.lookup::<String>("text")?;
    println!(
        "   [render] count = {}, text = {:?}",
        store.read(count)?,
        store.read(text)?
    );
    Ok(())
}

fn main() -> cellstore::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .init();

    println!("=== Counter Application ===\n");

    let store = StateStore::with_options(StoreOptions::default().with_label("app"));

    // Provider: shared count plus increment
    println!("1. Registering state");
    let count = store.create_cell("count", 0)?;
    let text = store.get_or_create("text", String::new())?;

    // Host re-renders whenever a cell it displays changes
    println!("\n2. Subscribing the host");
    let host = store.clone();
    let _count_sub = store.subscribe(count, move |old: &i32, new: &i32| {
        info!(old, new, "count changed");
        if let Err(e) = render(&host) {
            eprintln!("render failed: {e}");
        }
    })?;
    let host = store.clone();
    let _text_sub = store.subscribe(text, move |_: &String, _: &String| {
        if let Err(e) = render(&host) {
            eprintln!("render failed: {e}");
        }
    })?;

    // Memoized calculation over count only
    println!("\n3. Deriving an expensive calculation");
    let expensive = store.derive(count, |count| {
        println!("   [memo] calculating...");
        count * 2
    })?;
    println!("   expensive = {}", store.read_derived(expensive)?);
    println!("   expensive = {} (cached)", store.read_derived(expensive)?);

    println!("\n4. Clicking increment twice");
    store.update(count, |c| c + 1)?;
    store.update(count, |c| c + 1)?;
    println!("   expensive = {}", store.read_derived(expensive)?);

    println!("\n5. Typing into the text field");
    store.write(text, "hello".to_string())?;
    println!(
        "   expensive = {} (text is not a dependency, still cached)",
        store.read_derived(expensive)?
    );

    println!("\n6. Final state: {store:?}");
    Ok(())
}
