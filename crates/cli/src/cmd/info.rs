use tether_lib::gc::GcRoots;
use tether_lib::platform::{paths, platform_triple};

pub fn cmd_info() {
  println!("System:");
  match platform_triple() {
    Some(triple) => println!("Platform: {}", triple),
    _ => println!("Could not detect platform."),
  }

  println!();
  println!("Paths:");
  println!("Store: {}", paths::store_dir().display());
  println!("Data: {}", paths::data_dir().display());
  println!("Cache: {}", paths::cache_dir().display());

  let roots_file = paths::roots_file();
  match GcRoots::load(&roots_file) {
    Ok(roots) => println!("Roots: {} ({})", roots.len(), roots_file.display()),
    Err(err) => println!("Roots: unreadable ({err})"),
  }
}
