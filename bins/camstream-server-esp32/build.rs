//! Build script for the camstream ESP32 firmware.

fn main() {
    // Lets esp-idf-sys locate the ESP-IDF checkout and toolchain.
    embuild::espidf::sysenv::output();
}
