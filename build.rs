fn main() {
    // ── macOS: embed Info.plist so CoreBluetooth allows discovery ─────────────
    //
    // CBCentralManager stays "unauthorised" unless the binary carries an
    // Info.plist with NSBluetoothAlwaysUsageDescription.  CLI tools have no
    // bundle, so the plist goes into the __TEXT,__info_plist section of the
    // Mach-O image via `-sectcreate`.
    //
    // `CARGO_CFG_TARGET_OS` is the target, not the host, so cross builds
    // pick this up too.  Only needed when Bluetooth discovery is compiled in.
    let target_macos = std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("macos");
    let ble = std::env::var_os("CARGO_FEATURE_BLE").is_some();
    if !(target_macos && ble) {
        return;
    }

    let Ok(dir) = std::env::var("CARGO_MANIFEST_DIR") else {
        println!("cargo:warning=CARGO_MANIFEST_DIR unset; Info.plist not embedded");
        return;
    };
    let plist = format!("{dir}/Info.plist");

    println!("cargo:rustc-link-arg=-sectcreate");
    println!("cargo:rustc-link-arg=__TEXT");
    println!("cargo:rustc-link-arg=__info_plist");
    println!("cargo:rustc-link-arg={plist}");
    println!("cargo:rerun-if-changed=Info.plist");
}
