use burn_import::onnx::{ModelGen, RecordType};

fn main() {
    if std::env::var("CARGO_FEATURE_BUILD_VGG").is_ok() {
        println!("cargo:warning=converting models/vgg19.onnx into a named mpk record");
        ModelGen::new()
            .input("models/vgg19.onnx")
            .out_dir("models/")
            .record_type(RecordType::NamedMpk)
            .run_from_script();
    }
}
