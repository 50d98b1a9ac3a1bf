fn main() {
    // Migrations are embedded with include_str!
    println!("cargo:rerun-if-changed=migrations/");
    println!("cargo:rerun-if-changed=src/");
}
