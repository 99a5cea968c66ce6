//! Programmatically built schemas shared by the unit tests.
use prost::Message;
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, FileDescriptorSet, MessageOptions, MethodDescriptorProto,
    ServiceDescriptorProto,
    field_descriptor_proto::{Label, Type},
};

pub fn encode_set(files: Vec<FileDescriptorProto>) -> Vec<u8> {
    FileDescriptorSet { file: files }.encode_to_vec()
}

pub fn field(name: &str, number: i32, ty: Type) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        ..Default::default()
    }
}

pub fn repeated(mut field: FieldDescriptorProto) -> FieldDescriptorProto {
    field.label = Some(Label::Repeated as i32);
    field
}

pub fn typed_field(name: &str, number: i32, ty: Type, type_name: &str) -> FieldDescriptorProto {
    FieldDescriptorProto {
        type_name: Some(type_name.to_string()),
        ..field(name, number, ty)
    }
}

pub fn message(name: &str, fields: Vec<FieldDescriptorProto>) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_string()),
        field: fields,
        ..Default::default()
    }
}

pub fn method(name: &str, input: &str, output: &str) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.to_string()),
        input_type: Some(input.to_string()),
        output_type: Some(output.to_string()),
        ..Default::default()
    }
}

pub fn service(name: &str, methods: Vec<MethodDescriptorProto>) -> ServiceDescriptorProto {
    ServiceDescriptorProto {
        name: Some(name.to_string()),
        method: methods,
        ..Default::default()
    }
}

pub fn file(name: &str, package: &str) -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(name.to_string()),
        package: Some(package.to_string()),
        syntax: Some("proto3".to_string()),
        ..Default::default()
    }
}

/// `common.proto`: a dependency without services.
pub fn common_file() -> FileDescriptorProto {
    FileDescriptorProto {
        message_type: vec![message("Tag", vec![field("label", 1, Type::String)])],
        ..file("common.proto", "common")
    }
}

/// `greeter.proto`: the principal file, importing `common.proto`.
pub fn greeter_file() -> FileDescriptorProto {
    let subscribe = MethodDescriptorProto {
        server_streaming: Some(true),
        ..method("Subscribe", ".greeter.HelloRequest", ".greeter.HelloReply")
    };

    FileDescriptorProto {
        dependency: vec!["common.proto".to_string()],
        message_type: vec![
            message("HelloRequest", vec![field("name", 1, Type::String)]),
            message("HelloReply", vec![field("message", 1, Type::String)]),
        ],
        service: vec![service(
            "Greeter",
            vec![
                method("SayHello", ".greeter.HelloRequest", ".greeter.HelloReply"),
                method("SayGoodbye", "HelloRequest", "HelloReply"),
                method("Tagged", ".common.Tag", ".greeter.HelloReply"),
                subscribe,
            ],
        )],
        ..file("greeter.proto", "greeter")
    }
}

/// `sample.proto`: one message covering every scalar kind, nested messages, a map and an enum.
pub fn sample_file() -> FileDescriptorProto {
    let color = EnumDescriptorProto {
        name: Some("Color".to_string()),
        value: ["COLOR_UNSPECIFIED", "COLOR_RED", "COLOR_BLUE"]
            .iter()
            .enumerate()
            .map(|(number, name)| EnumValueDescriptorProto {
                name: Some(name.to_string()),
                number: Some(number as i32),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    };

    let labels_entry = DescriptorProto {
        options: Some(MessageOptions {
            map_entry: Some(true),
            ..Default::default()
        }),
        ..message(
            "LabelsEntry",
            vec![field("key", 1, Type::String), field("value", 2, Type::Int32)],
        )
    };

    let sample = DescriptorProto {
        nested_type: vec![
            message("Inner", vec![field("value", 1, Type::Int32)]),
            labels_entry,
        ],
        enum_type: vec![color],
        ..message(
            "Sample",
            vec![
                field("name", 1, Type::String),
                field("count", 2, Type::Int32),
                repeated(field("ids", 3, Type::Int64)),
                field("flag", 4, Type::Bool),
                field("ratio", 5, Type::Double),
                field("blob", 6, Type::Bytes),
                typed_field("inner", 7, Type::Message, "Inner"),
                repeated(field("tags", 8, Type::String)),
                typed_field("color", 9, Type::Enum, ".sample.Sample.Color"),
                field("big", 10, Type::Uint64),
                field("delta", 11, Type::Sint32),
                field("checksum", 12, Type::Fixed32),
                field("score", 13, Type::Float),
                field("small", 14, Type::Uint32),
                field("wide", 15, Type::Sint64),
                field("stamp", 16, Type::Fixed64),
                field("offset", 17, Type::Sfixed32),
                field("epoch", 18, Type::Sfixed64),
                field("total", 19, Type::Int64),
                repeated(typed_field("children", 20, Type::Message, "Inner")),
                repeated(typed_field("labels", 21, Type::Message, "LabelsEntry")),
            ],
        )
    };

    FileDescriptorProto {
        message_type: vec![sample],
        ..file("sample.proto", "sample")
    }
}
